pub(crate) mod array;
pub(crate) mod dtype;
pub(crate) mod grad_store;
pub(crate) mod tensor;
pub(crate) mod tensor_ir;

pub use crate::tensor_grad::{
    dtype::{DType, Element, TensorData},
    grad_store::GradStore,
    tensor::{Tensor, TensorID},
    tensor_ir::TensorMeta,
};
