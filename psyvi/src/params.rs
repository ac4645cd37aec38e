use ndarray::Array2;
use psyvi_util::candle_core::{self, DType, Tensor};
use serde::Serialize;
use std::collections::BTreeMap;

/// Named parameter matrices, e.g. `difficulty` (1 x J) or
/// `discrimination` (D x J)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterTable {
    entries: BTreeMap<String, Array2<f32>>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Array2<f32>) {
        self.entries.insert(name.to_string(), value);
    }

    /// Copy a rank-2 tensor to the host and store it
    pub fn insert_tensor(&mut self, name: &str, value: &Tensor) -> candle_core::Result<()> {
        self.insert(name, tensor_to_array2(value)?);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f32>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f32>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All values flattened in name order
    pub fn flatten(&self) -> Vec<f32> {
        self.entries
            .values()
            .flat_map(|v| v.iter().copied())
            .collect()
    }

    ///
    /// Mean absolute error against `truth` for every parameter present
    /// in both tables with the same shape
    ///
    pub fn mean_abs_error(&self, truth: &ParameterTable) -> BTreeMap<String, f32> {
        self.entries
            .iter()
            .filter_map(|(name, est)| {
                let tru = truth.get(name)?;
                if tru.dim() != est.dim() || est.is_empty() {
                    return None;
                }
                let mae = (est - tru).mapv(f32::abs).mean()?;
                Some((name.clone(), mae))
            })
            .collect()
    }
}

/// Anything that knows the parameters it generated data from
pub trait GroundTruth {
    fn true_parameters(&self) -> ParameterTable;
}

pub(crate) fn tensor_to_array2(x: &Tensor) -> candle_core::Result<Array2<f32>> {
    let (nrows, ncols) = x.dims2()?;
    let data = x
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Array2::from_shape_vec((nrows, ncols), data)
        .map_err(|e| candle_core::Error::Msg(format!("tensor to array: {}", e)))
}
