use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::Result,
        infer::normalize_axes,
        kernel::{reduced_shape, sum_axes},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

/// Axes a reduction acts on, resolved against the rank of `shape`.
pub(crate) fn reduction_axes(op: &str, attrs: &Attributes, shape: &[usize]) -> Result<Vec<usize>> {
    normalize_axes(op, "axis", &attrs.ints(op, "axis")?, shape.len())
}

pub(crate) fn reduce_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let axes = reduction_axes(ctx.op, ctx.attrs, &x.shape)?;
    let keep_dims = ctx.attrs.bool(ctx.op, "keep_dims")?;
    Ok(vec![x.with_shape(reduced_shape(&x.shape, &axes, keep_dims))])
}

/// Spreads the sensitivity of a reduction back over the reduced input.
pub(crate) fn expand_reduced(ctx: &GradContext) -> Result<Tensor> {
    let x = ctx.input(0);
    let axes = reduction_axes(ctx.op, ctx.attrs, x.shape())?;
    let kept = ctx.call1(
        "Reshape",
        &[ctx.dout(0).into()],
        Attributes::new().with("shape", reduced_shape(x.shape(), &axes, true)),
    )?;
    ctx.call1(
        "BroadcastTo",
        &[kept.into()],
        Attributes::new().with("shape", x.shape()),
    )
}

fn sum_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let axes = reduction_axes(ctx.op, ctx.attrs, x.shape())?;
    let keep_dims = ctx.attrs.bool(ctx.op, "keep_dims")?;
    let dtype = ctx.output_dtype(0);
    if dtype.is_float() {
        let summed = sum_axes(&x.to_array()?, &axes, keep_dims);
        Ok(vec![Tensor::from_array(dtype, &summed)])
    } else {
        let mut summed = x.to_i64_array()?;
        for &axis in axes.iter().rev() {
            summed = summed.sum_axis(ndarray::Axis(axis));
            if keep_dims {
                summed = summed.insert_axis(ndarray::Axis(axis));
            }
        }
        Ok(vec![Tensor::from_i64_array(dtype, &summed)])
    }
}

fn sum_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    Ok(vec![Some(expand_reduced(ctx)?)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("ReduceSum", OpKind::Math, reduce_infer, sum_forward)
            .input("x", DTypeClass::Numeric)
            .attr_default("axis", AttrType::Ints, Vec::<i64>::new())
            .attr_default("keep_dims", AttrType::Bool, false)
            .grad(sum_grad),
    )?;
    Ok(())
}
