use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        infer::unary_same,
        operation::{DTypeClass, ForwardContext, GradContext, OpKind, OperatorDescriptor},
        registry::Registry,
    },
};

// The dispatcher hands out a fresh identity for the returned tensor.
fn identity_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![ctx.input(0).clone()])
}

fn identity_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    Ok(vec![Some(ctx.dout(0).clone())])
}

fn ones_like_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    Ok(vec![Tensor::ones(x.dtype(), x.shape())])
}

fn zeros_like_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    Ok(vec![Tensor::zeros(x.dtype(), x.shape())])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Identity", OpKind::Array, unary_same, identity_forward)
            .input("x", DTypeClass::Any)
            .grad(identity_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("OnesLike", OpKind::Array, unary_same, ones_like_forward)
            .input("x", DTypeClass::Any),
    )?;
    registry.register(
        OperatorDescriptor::new("ZerosLike", OpKind::Array, unary_same, zeros_like_forward)
            .input("x", DTypeClass::Any),
    )?;
    Ok(())
}
