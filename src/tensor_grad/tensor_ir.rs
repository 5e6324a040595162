use std::fmt;

use itertools::Itertools;

use crate::tensor_op::error::{OpError, Result};

use super::dtype::DType;

/// Element count of `shape`. Counts that overflow `usize` are a
/// `ShapeMismatch`.
pub(crate) fn element_count(op: &str, shape: &[usize]) -> Result<usize> {
    if shape.contains(&0) {
        return Ok(0);
    }
    shape
        .iter()
        .try_fold(1_usize, |count, &dim| count.checked_mul(dim))
        .ok_or_else(|| {
            OpError::shape(
                op,
                None,
                usize::MAX,
                0,
                format!("shape {:?} holds more elements than can be addressed", shape),
            )
        })
}

/// Shape and dtype of a tensor without its data.
///
/// Inference works purely on metadata so a computation can be validated before
/// any element is touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorMeta {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorMeta {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        TensorMeta { shape, dtype }
    }

    pub fn scalar(dtype: DType) -> Self {
        TensorMeta::new(vec![], dtype)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Saturates at `usize::MAX`; shapes built by inference are checked
    /// with `element_count` first.
    pub fn numel(&self) -> usize {
        self.shape
            .iter()
            .fold(1_usize, |count, &dim| count.saturating_mul(dim))
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        TensorMeta::new(self.shape.clone(), dtype)
    }

    pub fn with_shape(&self, shape: Vec<usize>) -> Self {
        TensorMeta::new(shape, self.dtype)
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.dtype, self.shape.iter().join(", "))
    }
}
