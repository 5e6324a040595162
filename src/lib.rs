//! Operator registry, shape/type inference, forward dispatch and reverse-mode
//! differentiation for typed tensors.
//!
//! Operators are registry entries: a descriptor naming the operator's inputs,
//! attributes, inference rule, forward rule and optional gradient rule. A
//! [`session::Session`] strings invocations together, runs them and walks them
//! backwards to collect gradients.

pub mod amp;
pub mod prelude;
pub mod session;
pub mod tensor_grad;
pub mod tensor_op;
#[cfg(test)]
mod tests;
pub mod utility;

pub use crate::{
    session::{Arg, Handle, Session, SessionConfig, SessionState},
    tensor_grad::{DType, Tensor, TensorMeta},
    tensor_op::{Attributes, OpError, OpSpec, Registry, Result},
};
