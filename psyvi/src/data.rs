use crate::compute::ComputeContext;
use crate::error::{ConfigurationError, ModelError};
use ndarray::{Array2, ArrayView2};
use psyvi_util::candle_core::{self, Tensor};

/// Sentinel value for a missing response
pub const MISSING: f32 = -1.0;

///
/// Respondents (rows) by items (columns) binary responses.
///
/// Missing entries (`-1`) are stored as 0 together with an
/// observation mask, so every likelihood sum can skip them by
/// multiplying with the mask.
///
#[derive(Debug, Clone)]
pub struct ResponseMatrix {
    y: Tensor,
    mask: Tensor,
    nrows: usize,
    ncols: usize,
    num_missing: usize,
}

impl ResponseMatrix {
    pub fn from_array(data: ArrayView2<f32>, ctx: &ComputeContext) -> Result<Self, ModelError> {
        let (nrows, ncols) = data.dim();
        if nrows == 0 || ncols == 0 {
            return Err(ConfigurationError::EmptyData {
                rows: nrows,
                cols: ncols,
            }
            .into());
        }

        let mut y = Vec::with_capacity(nrows * ncols);
        let mut mask = Vec::with_capacity(nrows * ncols);
        let mut num_missing = 0;

        for ((row, col), &value) in data.indexed_iter() {
            if value == 0.0 || value == 1.0 {
                y.push(value);
                mask.push(1.0f32);
            } else if value == MISSING {
                y.push(0.0);
                mask.push(0.0);
                num_missing += 1;
            } else {
                return Err(ConfigurationError::InvalidResponse { row, col, value }.into());
            }
        }

        let y = Tensor::from_vec(y, (nrows, ncols), &ctx.device)?.to_dtype(ctx.dtype)?;
        let mask = Tensor::from_vec(mask, (nrows, ncols), &ctx.device)?.to_dtype(ctx.dtype)?;

        Ok(Self {
            y,
            mask,
            nrows,
            ncols,
            num_missing,
        })
    }

    /// Take a rank-2 tensor of responses; any other rank is rejected
    pub fn from_tensor(data: &Tensor, ctx: &ComputeContext) -> Result<Self, ModelError> {
        let rank = data.rank();
        if rank != 2 {
            return Err(ConfigurationError::NotAMatrix(rank).into());
        }
        let array = crate::params::tensor_to_array2(data)?;
        Self::from_array(array.view(), ctx)
    }

    pub fn from_rows(rows: &[Vec<f32>], ctx: &ComputeContext) -> Result<Self, ModelError> {
        let array = rows_to_array(rows)?;
        Self::from_array(array.view(), ctx)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn num_missing(&self) -> usize {
        self.num_missing
    }

    /// Responses with missing entries set to 0 (N x J)
    pub fn y(&self) -> &Tensor {
        &self.y
    }

    /// 1 for observed, 0 for missing (N x J)
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    /// Responses and mask of the selected rows
    pub fn rows(&self, rows: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        Ok((self.y.index_select(rows, 0)?, self.mask.index_select(rows, 0)?))
    }

    /// `[y * mask, mask]` of the selected rows (n x 2J), the input of
    /// recognition networks
    pub fn encoder_input(&self, rows: &Tensor) -> candle_core::Result<Tensor> {
        let (y, mask) = self.rows(rows)?;
        Tensor::cat(&[&y, &mask], 1)
    }

    /// Host copy with missing entries restored to `-1`
    pub fn to_array(&self) -> candle_core::Result<Array2<f32>> {
        let y = crate::params::tensor_to_array2(&self.y)?;
        let mask = crate::params::tensor_to_array2(&self.mask)?;
        Ok(ndarray::Zip::from(&y)
            .and(&mask)
            .map_collect(|&y, &m| if m > 0.0 { y } else { MISSING }))
    }
}

///
/// Skills (rows) by items (columns) binary requirement matrix
///
#[derive(Debug, Clone)]
pub struct QMatrix {
    q: Tensor,
    q_host: Array2<f32>,
}

impl QMatrix {
    ///
    /// * `q` - K x J binary matrix
    /// * `num_items` - number of items in the response data
    ///
    pub fn from_array(
        q: ArrayView2<f32>,
        num_items: usize,
        ctx: &ComputeContext,
    ) -> Result<Self, ModelError> {
        let (num_skills, q_items) = q.dim();

        if q_items != num_items {
            return Err(ConfigurationError::QMatrixItems {
                q_items,
                data_items: num_items,
            }
            .into());
        }

        check_binary(q, "Q-matrix")?;

        if let Some(k) = (0..num_skills).find(|&k| q.row(k).sum() == 0.0) {
            return Err(ConfigurationError::UnusedSkill(k).into());
        }

        if let Some(j) = (0..q_items).find(|&j| q.column(j).sum() == 0.0) {
            return Err(ConfigurationError::ItemWithoutSkill(j).into());
        }

        let q_host = q.to_owned();
        let q = Tensor::from_vec(
            q_host.iter().copied().collect::<Vec<_>>(),
            (num_skills, q_items),
            &ctx.device,
        )?
        .to_dtype(ctx.dtype)?;

        Ok(Self { q, q_host })
    }

    pub fn from_rows(
        rows: &[Vec<f32>],
        num_items: usize,
        ctx: &ComputeContext,
    ) -> Result<Self, ModelError> {
        let array = rows_to_array(rows)?;
        Self::from_array(array.view(), num_items, ctx)
    }

    pub fn num_skills(&self) -> usize {
        self.q_host.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.q_host.ncols()
    }

    /// K x J
    pub fn tensor(&self) -> &Tensor {
        &self.q
    }

    pub fn to_array(&self) -> &Array2<f32> {
        &self.q_host
    }
}

///
/// Latent dimensions (rows) by items (columns) loading pattern for
/// multidimensional IRT. Every item must load on at least one
/// dimension.
///
#[derive(Debug, Clone)]
pub struct Mask {
    mask: Array2<f32>,
}

impl Mask {
    pub fn new(
        mask: ArrayView2<f32>,
        num_dims: usize,
        num_items: usize,
    ) -> Result<Self, ConfigurationError> {
        let (rows, cols) = mask.dim();
        if rows != num_dims || cols != num_items {
            return Err(ConfigurationError::MaskShape {
                expected_rows: num_dims,
                expected_cols: num_items,
                rows,
                cols,
            });
        }

        check_binary(mask, "mask")?;

        if let Some(j) = (0..cols).find(|&j| mask.column(j).sum() == 0.0) {
            return Err(ConfigurationError::UnloadedItem(j));
        }

        Ok(Self {
            mask: mask.to_owned(),
        })
    }

    /// Every item loads on every dimension
    pub fn full(num_dims: usize, num_items: usize) -> Self {
        Self {
            mask: Array2::ones((num_dims, num_items)),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn to_tensor(&self, ctx: &ComputeContext) -> candle_core::Result<Tensor> {
        Tensor::from_vec(
            self.mask.iter().copied().collect::<Vec<_>>(),
            self.mask.dim(),
            &ctx.device,
        )?
        .to_dtype(ctx.dtype)
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.mask
    }
}

fn check_binary(x: ArrayView2<f32>, what: &'static str) -> Result<(), ConfigurationError> {
    match x
        .indexed_iter()
        .find(|(_, &v)| v != 0.0 && v != 1.0)
    {
        Some(((row, col), &value)) => Err(ConfigurationError::NonBinary {
            what,
            row,
            col,
            value,
        }),
        None => Ok(()),
    }
}

fn rows_to_array(rows: &[Vec<f32>]) -> Result<Array2<f32>, ConfigurationError> {
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
        return Err(ConfigurationError::RaggedRows {
            row,
            len: r.len(),
            expected: ncols,
        });
    }
    let nrows = rows.len();
    let flat = rows.iter().flatten().copied().collect::<Vec<_>>();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|_| ConfigurationError::EmptyData {
        rows: nrows,
        cols: ncols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use psyvi_util::candle_core::Device;

    #[test]
    fn missing_entries_are_masked() -> anyhow::Result<()> {
        let ctx = ComputeContext::cpu();
        let data = array![[1f32, -1.0, 0.0], [0.0, 1.0, -1.0]];
        let rm = ResponseMatrix::from_array(data.view(), &ctx)?;
        assert_eq!(rm.num_missing(), 2);
        assert_eq!(
            rm.mask().to_vec2::<f32>()?,
            vec![vec![1.0, 0.0, 1.0], vec![1.0, 1.0, 0.0]]
        );
        assert_eq!(
            rm.y().to_vec2::<f32>()?,
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]
        );
        assert_eq!(rm.to_array()?, data);

        let idx = Tensor::new(&[1u32], &Device::Cpu)?;
        assert_eq!(rm.encoder_input(&idx)?.dims(), &[1, 6]);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        let ctx = ComputeContext::cpu();
        let data = array![[1f32, 2.0], [0.0, 1.0]];
        let err = ResponseMatrix::from_array(data.view(), &ctx).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Configuration(ConfigurationError::InvalidResponse { row: 0, col: 1, .. })
        ));

        let data = array![[1f32, f32::NAN]];
        assert!(ResponseMatrix::from_array(data.view(), &ctx).is_err());
    }

    #[test]
    fn tensor_input_must_be_rank_two() -> anyhow::Result<()> {
        let ctx = ComputeContext::cpu();
        let x = Tensor::zeros((2, 3, 4), candle_core::DType::F32, &Device::Cpu)?;
        let err = ResponseMatrix::from_tensor(&x, &ctx).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Configuration(ConfigurationError::NotAMatrix(3))
        ));
        let x = Tensor::ones((2, 3), candle_core::DType::F32, &Device::Cpu)?;
        assert_eq!(ResponseMatrix::from_tensor(&x, &ctx)?.nrows(), 2);
        Ok(())
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let ctx = ComputeContext::cpu();
        let rows = vec![vec![1f32, 0.0], vec![1.0]];
        assert!(matches!(
            ResponseMatrix::from_rows(&rows, &ctx),
            Err(ModelError::Configuration(ConfigurationError::RaggedRows { row: 1, .. }))
        ));
    }

    #[test]
    fn q_matrix_validation() {
        let ctx = ComputeContext::cpu();
        let q = array![[1f32, 0.0, 1.0], [0.0, 1.0, 1.0]];
        assert!(QMatrix::from_array(q.view(), 3, &ctx).is_ok());

        assert!(matches!(
            QMatrix::from_array(q.view(), 4, &ctx),
            Err(ModelError::Configuration(ConfigurationError::QMatrixItems { .. }))
        ));

        let q = array![[1f32, 0.0, 1.0], [0.0, 0.0, 0.0]];
        assert!(matches!(
            QMatrix::from_array(q.view(), 3, &ctx),
            Err(ModelError::Configuration(ConfigurationError::UnusedSkill(1)))
        ));

        let q = array![[1f32, 0.0, 1.0], [1.0, 0.0, 0.0]];
        assert!(matches!(
            QMatrix::from_array(q.view(), 3, &ctx),
            Err(ModelError::Configuration(ConfigurationError::ItemWithoutSkill(1)))
        ));

        let q = array![[1f32, 0.5, 1.0]];
        assert!(matches!(
            QMatrix::from_array(q.view(), 3, &ctx),
            Err(ModelError::Configuration(ConfigurationError::NonBinary { .. }))
        ));
    }

    #[test]
    fn mask_validation() {
        let m = array![[1f32, 0.0, 1.0], [0.0, 1.0, 1.0]];
        assert!(Mask::new(m.view(), 2, 3).is_ok());
        assert!(matches!(
            Mask::new(m.view(), 1, 3),
            Err(ConfigurationError::MaskShape { .. })
        ));
        let m = array![[1f32, 0.0], [1.0, 0.0]];
        assert!(matches!(
            Mask::new(m.view(), 2, 2),
            Err(ConfigurationError::UnloadedItem(1))
        ));
    }
}
