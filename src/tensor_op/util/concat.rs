//! Joining and slicing along an axis.

use ndarray::{ArrayD, Axis, Slice};

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::normalize_axis,
        kernel::layout_error,
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

fn concat_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let parts = ctx.slot(0);
    let first = &parts[0];
    let axis = normalize_axis(ctx.op, "axis", ctx.attrs.int(ctx.op, "axis")?, first.rank(), false)?;
    let mut shape = first.shape.clone();
    for part in &parts[1..] {
        if part.rank() != first.rank() {
            return Err(OpError::shape(
                ctx.op,
                None,
                first.rank(),
                part.rank(),
                format!("cannot concatenate rank {} with rank {}", part.rank(), first.rank()),
            ));
        }
        if let Some(dim) = (0..first.rank()).find(|&dim| dim != axis && part.shape[dim] != first.shape[dim]) {
            return Err(OpError::shape(
                ctx.op,
                Some(dim),
                first.shape[dim],
                part.shape[dim],
                format!(
                    "cannot concatenate {:?} with {:?} along axis {}",
                    part.shape, first.shape, axis
                ),
            ));
        }
        shape[axis] += part.shape[axis];
    }
    Ok(vec![first.with_shape(shape)])
}

fn concat_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let parts = ctx.slot(0);
    let axis = normalize_axis(ctx.op, "axis", ctx.attrs.int(ctx.op, "axis")?, parts[0].rank(), false)?;
    let mut joined = parts[0].data().clone();
    let mut offset = 0;
    let mut positions: Vec<ArrayD<usize>> = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        if index > 0 && !joined.extend(part.data()) {
            return Err(OpError::mismatch(ctx.op, 0, parts[0].dtype().to_string(), part.dtype().to_string()));
        }
        positions.push(part.positions()?.mapv(|at| at + offset));
        offset += part.numel();
    }
    let views: Vec<_> = positions.iter().map(|array| array.view()).collect();
    let order = ndarray::concatenate(Axis(axis), &views).map_err(|err| layout_error(ctx.op, err))?;
    let source = Tensor::from_parts(parts[0].dtype(), vec![offset], joined);
    Ok(vec![source.gather(&order)])
}

/// Cuts the sensitivity back into one piece per input.
fn concat_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dout = ctx.dout(0);
    let axis = normalize_axis(ctx.op, "axis", ctx.attrs.int(ctx.op, "axis")?, dout.rank(), false)?;
    let mut start = 0;
    let mut grads = Vec::with_capacity(ctx.inputs.len());
    for input in ctx.inputs {
        let mut begin = vec![0_i64; dout.rank()];
        begin[axis] = start as i64;
        let size: Vec<i64> = input.shape().iter().map(|&dim| dim as i64).collect();
        grads.push(Some(ctx.call1(
            "Slice",
            &[dout.into()],
            Attributes::new().with("begin", begin).with("size", size),
        )?));
        start += input.shape()[axis];
    }
    Ok(grads)
}

/// Start and end of the window along every axis. A size of -1 runs to the end.
fn slice_bounds(op: &str, attrs: &Attributes, shape: &[usize]) -> Result<Vec<(usize, usize)>> {
    let (begin, size) = (attrs.ints(op, "begin")?, attrs.ints(op, "size")?);
    for (name, values) in [("begin", &begin), ("size", &size)].iter() {
        if values.len() != shape.len() {
            return Err(OpError::attribute_type(
                op,
                name,
                format!("{} values, one per dimension", shape.len()),
                format!("{:?}", values),
            ));
        }
    }
    let mut bounds = Vec::with_capacity(shape.len());
    for (dim, &extent) in shape.iter().enumerate() {
        if begin[dim] < 0 || (begin[dim] as usize) > extent {
            return Err(OpError::attribute_type(
                op,
                "begin",
                format!("an offset in [0, {}] at dimension {}", extent, dim),
                begin[dim].to_string(),
            ));
        }
        let start = begin[dim] as usize;
        let end = match size[dim] {
            -1 => extent,
            len if len >= 0 && start + (len as usize) <= extent => start + len as usize,
            len => {
                return Err(OpError::shape(
                    op,
                    Some(dim),
                    extent,
                    start + len.max(0) as usize,
                    format!(
                        "slice of {} from {} overruns dimension {} of size {}",
                        len, start, dim, extent
                    ),
                ))
            }
        };
        bounds.push((start, end));
    }
    Ok(bounds)
}

fn slice_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let bounds = slice_bounds(ctx.op, ctx.attrs, &x.shape)?;
    Ok(vec![x.with_shape(bounds.iter().map(|(start, end)| end - start).collect())])
}

fn slice_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let mut positions = x.positions()?;
    for (dim, (start, end)) in slice_bounds(ctx.op, ctx.attrs, x.shape())?.into_iter().enumerate() {
        positions.slice_axis_inplace(Axis(dim), Slice::from(start..end));
    }
    Ok(vec![x.gather(&positions)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Concat", OpKind::Array, concat_infer, concat_forward)
            .tuple("inputs", DTypeClass::Any)
            .attr_default("axis", AttrType::Int, 0_i64)
            .grad(concat_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Slice", OpKind::Array, slice_infer, slice_forward)
            .input("x", DTypeClass::Any)
            .attr("begin", AttrType::Ints)
            .attr("size", AttrType::Ints),
    )?;
    Ok(())
}
