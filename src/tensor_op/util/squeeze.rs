use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{normalize_axes, normalize_axis},
        operation::{DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::AttrType,
        registry::Registry,
    },
};

use super::reshape::restore_shape;

/// Drops the listed size-1 axes, or every size-1 axis when none are listed.
fn squeeze_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let requested = ctx.attrs.ints(ctx.op, "axis")?;
    let axes = if requested.is_empty() {
        (0..x.rank()).filter(|&dim| x.shape[dim] == 1).collect()
    } else {
        normalize_axes(ctx.op, "axis", &requested, x.rank())?
    };
    if let Some(&dim) = axes.iter().find(|&&dim| x.shape[dim] != 1) {
        return Err(OpError::shape(
            ctx.op,
            Some(dim),
            1,
            x.shape[dim],
            format!(
                "cannot squeeze dimension {} of size {} in {:?}",
                dim, x.shape[dim], x.shape
            ),
        ));
    }
    let shape = x
        .shape
        .iter()
        .enumerate()
        .filter(|(dim, _)| !axes.contains(dim))
        .map(|(_, &size)| size)
        .collect();
    Ok(vec![x.with_shape(shape)])
}

fn expand_dims_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let axis = normalize_axis(ctx.op, "axis", ctx.attrs.int(ctx.op, "axis")?, x.rank(), true)?;
    let mut shape = x.shape.clone();
    shape.insert(axis, 1);
    Ok(vec![x.with_shape(shape)])
}

fn relabel_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![ctx.input(0).reshape(&ctx.outputs[0].shape)?])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Squeeze", OpKind::Array, squeeze_infer, relabel_forward)
            .input("x", DTypeClass::Any)
            .attr_default("axis", AttrType::Ints, Vec::<i64>::new())
            .grad(restore_shape),
    )?;
    registry.register(
        OperatorDescriptor::new("ExpandDims", OpKind::Array, expand_dims_infer, relabel_forward)
            .input("x", DTypeClass::Any)
            .attr("axis", AttrType::Int)
            .grad(restore_shape),
    )?;
    Ok(())
}
