use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        kernel::sum_axes,
        operation::{DTypeClass, ForwardContext, GradContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

use super::sum::{expand_reduced, reduce_infer, reduction_axes};

/// Number of elements folded into each output element.
fn reduced_count(shape: &[usize], axes: &[usize]) -> usize {
    axes.iter().map(|&axis| shape[axis]).product()
}

fn mean_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let axes = reduction_axes(ctx.op, ctx.attrs, x.shape())?;
    let keep_dims = ctx.attrs.bool(ctx.op, "keep_dims")?;
    // An empty reduction divides by zero and yields NaN, like any 0/0.
    let count = reduced_count(x.shape(), &axes) as f64;
    let mean = sum_axes(&x.to_array()?, &axes, keep_dims).mapv(|total| total / count);
    Ok(vec![Tensor::from_array(ctx.output_dtype(0), &mean)])
}

fn mean_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let x = ctx.input(0);
    let axes = reduction_axes(ctx.op, ctx.attrs, x.shape())?;
    let scale = ctx.constant(0, 1.0 / reduced_count(x.shape(), &axes) as f64);
    let expanded = expand_reduced(ctx)?;
    let dx = ctx.call1("Mul", &[expanded.into(), scale.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("ReduceMean", OpKind::Math, reduce_infer, mean_forward)
            .input("x", DTypeClass::Float)
            .attr_default("axis", AttrType::Ints, Vec::<i64>::new())
            .attr_default("keep_dims", AttrType::Bool, false)
            .grad(mean_grad),
    )?;
    Ok(())
}
