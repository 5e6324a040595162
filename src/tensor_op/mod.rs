use crate::tensor_grad::{Tensor, TensorMeta};

pub mod arith;
pub mod chain_gradient;
pub mod dispatch;
pub mod error;
pub mod infer;
pub mod invocation;
pub(crate) mod kernel;
pub mod nn;
pub mod operation;
pub mod operation_ir;
pub mod optim;
pub mod registry;
pub mod util;
pub mod vision;

pub use self::{
    error::{OpError, Result},
    invocation::{Invocation, Record},
    operation::{Arity, DTypeClass, OpKind, OperatorDescriptor},
    operation_ir::{AttrType, AttrValue, Attributes, OpSpec},
    registry::Registry,
};

/// An operator input: a tensor, a tuple of tensors, or a bare constant.
///
/// Constants are never accepted by a tensor slot; they exist so misuse is
/// reported as a typed error rather than being unrepresentable.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Tensor),
    Tuple(Vec<Tensor>),
    Const(AttrValue),
}

/// Metadata counterpart of [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueMeta {
    Tensor(TensorMeta),
    Tuple(Vec<TensorMeta>),
    Const(AttrValue),
}

impl Value {
    pub fn meta(&self) -> ValueMeta {
        match self {
            Value::Tensor(tensor) => ValueMeta::Tensor(tensor.meta()),
            Value::Tuple(tensors) => ValueMeta::Tuple(tensors.iter().map(Tensor::meta).collect()),
            Value::Const(value) => ValueMeta::Const(value.clone()),
        }
    }

    /// Contained tensors in order; empty for a constant.
    pub fn tensors(&self) -> Vec<Tensor> {
        match self {
            Value::Tensor(tensor) => vec![tensor.clone()],
            Value::Tuple(tensors) => tensors.clone(),
            Value::Const(_) => vec![],
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<&Tensor> for Value {
    fn from(tensor: &Tensor) -> Self {
        Value::Tensor(tensor.clone())
    }
}

impl From<Vec<Tensor>> for Value {
    fn from(tensors: Vec<Tensor>) -> Self {
        Value::Tuple(tensors)
    }
}

/// Registers every built-in operator into `registry`.
pub fn register_builtins(registry: &mut Registry) -> Result<()> {
    arith::register(registry)?;
    util::register(registry)?;
    nn::register(registry)?;
    optim::register(registry)?;
    vision::register(registry)?;
    Ok(())
}
