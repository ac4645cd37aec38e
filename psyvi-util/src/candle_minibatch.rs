use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;

///
/// A helper `struct` for drawing minibatch row indexes uniformly
/// without replacement; `None` or a size at least the number of rows
/// falls back to the full batch.
///
#[derive(Debug, Clone)]
pub struct Minibatches {
    num_rows: usize,
    batch_size: Option<usize>,
}

impl Minibatches {
    pub fn new(num_rows: usize, batch_size: Option<usize>) -> Self {
        Self {
            num_rows,
            batch_size,
        }
    }

    pub fn is_full_batch(&self) -> bool {
        match self.batch_size {
            Some(b) => b >= self.num_rows,
            None => true,
        }
    }

    /// number of rows per draw
    pub fn size(&self) -> usize {
        match self.batch_size {
            Some(b) => b.min(self.num_rows),
            None => self.num_rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// N / B, the factor that makes the minibatch sum unbiased
    pub fn scale(&self) -> f64 {
        self.num_rows as f64 / self.size() as f64
    }

    /// Draw one minibatch of sorted row indexes
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<u32> {
        if self.is_full_batch() {
            return (0..self.num_rows as u32).collect();
        }
        let mut rows: Vec<u32> = rand::seq::index::sample(rng, self.num_rows, self.size())
            .into_iter()
            .map(|i| i as u32)
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Draw one minibatch as an index tensor on `device`
    pub fn sample_tensor<R: Rng>(&self, rng: &mut R, device: &Device) -> Result<Tensor> {
        let rows = self.sample(rng);
        let n = rows.len();
        Tensor::from_vec(rows, (n,), device)
    }
}

/// Contiguous `[lb, ub)` chunks covering `0..num_rows`
pub fn row_chunks(num_rows: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let chunk_size = chunk_size.max(1);
    (0..num_rows)
        .step_by(chunk_size)
        .map(|lb| (lb, (lb + chunk_size).min(num_rows)))
        .collect()
}

/// Standard normal noise drawn from a caller-owned RNG so that a run
/// is reproducible from its seed regardless of the device.
pub fn standard_normal<R, S>(rng: &mut R, shape: S, dtype: DType, device: &Device) -> Result<Tensor>
where
    R: Rng,
    S: Into<Shape>,
{
    let shape: Shape = shape.into();
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Tensor::from_vec(data, shape, device)?.to_dtype(dtype)
}
