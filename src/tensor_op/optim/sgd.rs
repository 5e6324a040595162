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

fn sgd_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    require("SGD", attrs, "learning_rate", "a positive float", |lr| lr > 0.0)?;
    require("SGD", attrs, "weight_decay", "a non-negative float", |wd| wd >= 0.0)?;
    Ok(())
}

fn sgd_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (var, grad) = (ctx.input(0), ctx.input(1));
    same_dtype(ctx.op, "grad", var.dtype, grad.dtype)?;
    same_shape(ctx.op, &var.shape, &grad.shape)?;
    Ok(vec![var.clone()])
}

/// `var - lr * (grad + weight_decay * var)`
fn sgd_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let lr = ctx.attrs.float(ctx.op, "learning_rate")?;
    let decay = ctx.attrs.float(ctx.op, "weight_decay")?;
    let (var, grad) = (ctx.input(0).to_array()?, ctx.input(1).to_array()?);
    let step = &grad + &(&var * decay);
    let updated = var - &(step * lr);
    Ok(vec![Tensor::from_array(ctx.output_dtype(0), &updated)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("SGD", OpKind::Optimizer, sgd_infer, sgd_forward)
            .input("var", DTypeClass::Float)
            .input("grad", DTypeClass::Float)
            .attr("learning_rate", AttrType::Float)
            .attr_default("weight_decay", AttrType::Float, 0.0)
            .check(sgd_check),
    )?;
    Ok(())
}
