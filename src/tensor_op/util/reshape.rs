//! Operators that change a tensor's shape without touching element order.

use ndarray::IxDyn;

use crate::{
    tensor_grad::{tensor_ir::element_count, Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        kernel::{broadcast_error, sum_to_shape},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

/// Resolves a requested shape holding at most one `-1` against `numel`.
pub(crate) fn resolve_shape(op: &str, requested: &[i64], numel: usize) -> Result<Vec<usize>> {
    let inferred: Vec<usize> = requested
        .iter()
        .enumerate()
        .filter(|(_, dim)| **dim == -1)
        .map(|(index, _)| index)
        .collect();
    if inferred.len() > 1 || requested.iter().any(|&dim| dim < -1) {
        return Err(OpError::attribute_type(
            op,
            "shape",
            "non-negative dimensions with at most one -1",
            format!("{:?}", requested),
        ));
    }
    let fixed: Vec<usize> = requested
        .iter()
        .filter(|&&dim| dim >= 0)
        .map(|&dim| dim as usize)
        .collect();
    let known = element_count(op, &fixed)?;
    let mut shape: Vec<usize> = requested.iter().map(|&dim| dim.max(0) as usize).collect();
    if let Some(&index) = inferred.first() {
        if known == 0 || numel % known != 0 {
            return Err(OpError::shape(
                op,
                None,
                numel,
                known,
                format!(
                    "cannot infer the -1 dimension of {:?} from {} elements",
                    requested, numel
                ),
            ));
        }
        shape[index] = numel / known;
    } else if known != numel {
        return Err(OpError::shape(
            op,
            None,
            numel,
            known,
            format!(
                "cannot reshape {} elements into {:?} ({} elements)",
                numel, requested, known
            ),
        ));
    }
    Ok(shape)
}

fn reshape_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let requested = ctx.attrs.ints(ctx.op, "shape")?;
    Ok(vec![x.with_shape(resolve_shape(ctx.op, &requested, x.numel())?)])
}

fn reshape_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![ctx.input(0).reshape(&ctx.outputs[0].shape)?])
}

/// Reshapes the sensitivity back to the input's shape.
pub(crate) fn restore_shape(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dx = ctx.call1(
        "Reshape",
        &[ctx.dout(0).into()],
        Attributes::new().with("shape", ctx.input(0).shape()),
    )?;
    Ok(vec![Some(dx)])
}

fn flatten_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    match x.shape.split_first() {
        Some((&batch, rest)) => Ok(vec![x.with_shape(vec![batch, element_count(ctx.op, rest)?])]),
        None => Err(OpError::shape(
            ctx.op,
            None,
            1,
            0,
            "input must have rank at least 1, got a scalar",
        )),
    }
}

fn broadcast_to_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let requested = ctx.attrs.ints(ctx.op, "shape")?;
    if requested.len() < x.rank() {
        return Err(OpError::shape(
            ctx.op,
            None,
            x.rank(),
            requested.len(),
            format!("cannot broadcast rank {} to {:?}", x.rank(), requested),
        ));
    }
    let lead = requested.len() - x.rank();
    let mut shape = Vec::with_capacity(requested.len());
    for (dim, &target) in requested.iter().enumerate() {
        let source = if dim < lead { None } else { Some(x.shape[dim - lead]) };
        let size = match (target, source) {
            (-1, Some(size)) => size,
            (target, _) if target < 0 => {
                return Err(OpError::attribute_type(
                    ctx.op,
                    "shape",
                    "non-negative dimensions, or -1 over an input dimension",
                    format!("{:?}", requested),
                ))
            }
            (target, Some(size)) if size != 1 && size as i64 != target => {
                return Err(OpError::shape(
                    ctx.op,
                    Some(dim),
                    target as usize,
                    size,
                    format!(
                        "cannot broadcast {:?} to {:?} at dimension {}",
                        x.shape, requested, dim
                    ),
                ))
            }
            (target, _) => target as usize,
        };
        shape.push(size);
    }
    element_count(ctx.op, &shape)?;
    Ok(vec![x.with_shape(shape)])
}

fn broadcast_to_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let target = &ctx.outputs[0].shape;
    let positions = x.positions()?;
    let spread = positions
        .broadcast(IxDyn(target))
        .ok_or_else(|| broadcast_error(ctx.op, x.shape(), target))?
        .to_owned();
    Ok(vec![x.gather(&spread)])
}

fn broadcast_to_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    Ok(vec![Some(sum_to_shape(ctx, ctx.dout(0), ctx.input(0).shape())?)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Reshape", OpKind::Array, reshape_infer, reshape_forward)
            .input("x", DTypeClass::Any)
            .attr("shape", AttrType::Ints)
            .grad(restore_shape),
    )?;
    registry.register(
        OperatorDescriptor::new("Flatten", OpKind::Array, flatten_infer, reshape_forward)
            .input("x", DTypeClass::Any)
            .grad(restore_shape),
    )?;
    registry.register(
        OperatorDescriptor::new("BroadcastTo", OpKind::Array, broadcast_to_infer, broadcast_to_forward)
            .input("x", DTypeClass::Any)
            .attr("shape", AttrType::Ints)
            .grad(broadcast_to_grad),
    )?;
    Ok(())
}
