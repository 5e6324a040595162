use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

fn cast_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let target = ctx.attrs.dtype(ctx.op, "dst_type")?;
    if !x.dtype.can_cast_to(target) {
        return Err(OpError::UnsupportedCast {
            from: x.dtype,
            to: target,
        });
    }
    Ok(vec![x.with_dtype(target)])
}

fn cast_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![ctx.input(0).astype(ctx.output_dtype(0))?])
}

/// Only float to float casts carry a sensitivity.
fn cast_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (x, dout) = (ctx.input(0), ctx.dout(0));
    if !(x.dtype().is_float() && dout.dtype().is_float()) {
        return Ok(vec![None]);
    }
    let dx = ctx.call1(
        "Cast",
        &[dout.into()],
        Attributes::new().with("dst_type", x.dtype()),
    )?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Cast", OpKind::Array, cast_infer, cast_forward)
            .input("x", DTypeClass::Any)
            .attr("dst_type", AttrType::DType)
            .grad(cast_grad),
    )?;
    Ok(())
}
