//! Bridge between tensors and `ndarray` arrays, which the kernels compute on.

use ndarray::{ArrayD, IxDyn};

use crate::tensor_op::error::{OpError, Result};

use super::{
    dtype::{DType, TensorData},
    tensor::Tensor,
};

fn layout_error(err: ndarray::ShapeError, shape: &[usize]) -> OpError {
    OpError::shape(
        "Tensor",
        None,
        shape.iter().product(),
        0,
        format!("cannot view tensor of shape {:?} as an array: {}", shape, err),
    )
}

impl Tensor {
    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        ArrayD::from_shape_vec(IxDyn(self.shape()), self.read())
            .map_err(|err| layout_error(err, self.shape()))
    }

    /// Exact integer view, used by integer and bitwise kernels.
    pub fn to_i64_array(&self) -> Result<ArrayD<i64>> {
        ArrayD::from_shape_vec(IxDyn(self.shape()), self.data().to_i64_vec())
            .map_err(|err| layout_error(err, self.shape()))
    }

    /// Converts an array into a tensor of `dtype`, in logical row-major order
    /// regardless of the array's memory layout.
    pub fn from_array(dtype: DType, array: &ArrayD<f64>) -> Tensor {
        let values: Vec<f64> = array.iter().cloned().collect();
        Tensor::from_parts(
            dtype,
            array.shape().to_vec(),
            TensorData::from_f64(dtype, &values),
        )
    }

    /// Row-major element positions laid out in the tensor's shape.
    ///
    /// Layout operators rearrange positions and then [`Tensor::gather`] the
    /// elements, which keeps every dtype exact.
    pub(crate) fn positions(&self) -> Result<ArrayD<usize>> {
        ArrayD::from_shape_vec(IxDyn(self.shape()), (0..self.numel()).collect())
            .map_err(|err| layout_error(err, self.shape()))
    }

    /// Tensor shaped like `positions` holding the elements they point at.
    pub(crate) fn gather(&self, positions: &ArrayD<usize>) -> Tensor {
        let order: Vec<usize> = positions.iter().cloned().collect();
        Tensor::from_parts(
            self.dtype(),
            positions.shape().to_vec(),
            self.data().gather(&order),
        )
    }

    pub fn from_i64_array(dtype: DType, array: &ArrayD<i64>) -> Tensor {
        let values: Vec<i64> = array.iter().cloned().collect();
        Tensor::from_parts(
            dtype,
            array.shape().to_vec(),
            TensorData::from_i64(dtype, &values),
        )
    }
}
