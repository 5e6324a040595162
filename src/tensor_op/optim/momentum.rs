use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::Result,
        infer::{same_dtype, same_shape},
        operation::{DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

use super::require;

fn momentum_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    require("ApplyMomentum", attrs, "learning_rate", "a positive float", |lr| lr > 0.0)?;
    require("ApplyMomentum", attrs, "momentum", "a non-negative float", |m| m >= 0.0)?;
    Ok(())
}

fn momentum_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (var, accum, grad) = (ctx.input(0), ctx.input(1), ctx.input(2));
    same_dtype(ctx.op, "accum", var.dtype, accum.dtype)?;
    same_dtype(ctx.op, "grad", var.dtype, grad.dtype)?;
    same_shape(ctx.op, &var.shape, &accum.shape)?;
    same_shape(ctx.op, &var.shape, &grad.shape)?;
    Ok(vec![var.clone(), accum.clone()])
}

fn momentum_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let lr = ctx.attrs.float(ctx.op, "learning_rate")?;
    let momentum = ctx.attrs.float(ctx.op, "momentum")?;
    let nesterov = ctx.attrs.bool(ctx.op, "use_nesterov")?;
    let var = ctx.input(0).to_array()?;
    let accum = ctx.input(1).to_array()?;
    let grad = ctx.input(2).to_array()?;
    let accum = accum * momentum + &grad;
    let step = if nesterov {
        (&grad + &(&accum * momentum)) * lr
    } else {
        &accum * lr
    };
    let var = var - &step;
    let dtype = ctx.output_dtype(0);
    Ok(vec![
        Tensor::from_array(dtype, &var),
        Tensor::from_array(dtype, &accum),
    ])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("ApplyMomentum", OpKind::Optimizer, momentum_infer, momentum_forward)
            .input("var", DTypeClass::Float)
            .input("accum", DTypeClass::Float)
            .input("grad", DTypeClass::Float)
            .attr("learning_rate", AttrType::Float)
            .attr("momentum", AttrType::Float)
            .attr_default("use_nesterov", AttrType::Bool, false)
            .outputs(2)
            .check(momentum_check),
    )?;
    Ok(())
}
