use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        infer::binary_broadcast,
        kernel::{map_binary, sum_to_shape},
        operation::{DTypeClass, ForwardContext, GradContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

fn maximum_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        f64::max,
        i64::max,
    )?])
}

fn minimum_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        f64::min,
        i64::min,
    )?])
}

/// Routes the sensitivity to whichever side `predicate` selects; ties go to x.
fn route(ctx: &GradContext, predicate: &str) -> Result<Vec<Option<Tensor>>> {
    let (x, y, dout) = (ctx.input(0), ctx.input(1), ctx.dout(0));
    let none = Attributes::new;
    let chosen = ctx.call1(predicate, &[x.into(), y.into()], none())?;
    let mask = ctx.call1(
        "Cast",
        &[chosen.into()],
        Attributes::new().with("dst_type", x.dtype()),
    )?;
    let inverse = ctx.call1("Sub", &[ctx.constant(0, 1.0).into(), (&mask).into()], none())?;
    let dx = ctx.call1("Mul", &[dout.into(), mask.into()], none())?;
    let dy = ctx.call1("Mul", &[dout.into(), inverse.into()], none())?;
    Ok(vec![
        Some(sum_to_shape(ctx, &dx, x.shape())?),
        Some(sum_to_shape(ctx, &dy, y.shape())?),
    ])
}

fn maximum_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    route(ctx, "GreaterEqual")
}

fn minimum_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    route(ctx, "LessEqual")
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Maximum", OpKind::Math, binary_broadcast, maximum_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric)
            .grad(maximum_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Minimum", OpKind::Math, binary_broadcast, minimum_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric)
            .grad(minimum_grad),
    )?;
    Ok(())
}
