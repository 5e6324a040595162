pub use crate::{
    amp::{grads_finite, scale_loss, unscale_grads, DynamicLossScale},
    session::{Arg, Handle, Session, SessionConfig, SessionState},
    tensor_grad::{DType, Element, GradStore, Tensor, TensorMeta},
    tensor_op::{
        AttrType, AttrValue, Attributes, DTypeClass, Invocation, OpError, OpKind, OpSpec,
        OperatorDescriptor, Registry, Result, Value,
    },
    utility::init_logging,
};
