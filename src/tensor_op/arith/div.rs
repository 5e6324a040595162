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

fn real_div_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| x / y,
        |x, y| x.checked_div(y).unwrap_or(0),
    )?])
}

// d(x/y) = dout / y, -dout * out / y
fn real_div_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (x, y, out, dout) = (ctx.input(0), ctx.input(1), ctx.output(0), ctx.dout(0));
    let dx = ctx.call1("RealDiv", &[dout.into(), y.into()], Attributes::new())?;
    let ratio = ctx.call1("RealDiv", &[out.into(), y.into()], Attributes::new())?;
    let scaled = ctx.call1("Mul", &[dout.into(), ratio.into()], Attributes::new())?;
    let dy = ctx.call1("Neg", &[scaled.into()], Attributes::new())?;
    Ok(vec![
        Some(sum_to_shape(ctx, &dx, x.shape())?),
        Some(sum_to_shape(ctx, &dy, y.shape())?),
    ])
}

/// Quotient rounded toward negative infinity. Division by zero yields zero.
pub(crate) fn floor_div_i64(x: i64, y: i64) -> i64 {
    if y == 0 {
        return 0;
    }
    let quotient = x.wrapping_div(y);
    if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

fn floor_div_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| (x / y).floor(),
        floor_div_i64,
    )?])
}

/// Remainder taking the sign of the divisor.
fn floor_mod_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| x - (x / y).floor() * y,
        |x, y| x.wrapping_sub(floor_div_i64(x, y).wrapping_mul(y)),
    )?])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("RealDiv", OpKind::Math, binary_broadcast, real_div_forward)
            .input("x", DTypeClass::Float)
            .input("y", DTypeClass::Float)
            .grad(real_div_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("FloorDiv", OpKind::Math, binary_broadcast, floor_div_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric),
    )?;
    registry.register(
        OperatorDescriptor::new("FloorMod", OpKind::Math, binary_broadcast, floor_mod_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric),
    )?;
    Ok(())
}
