use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        infer::{binary_broadcast, unary_same},
        kernel::{map_binary, map_unary, sum_to_shape},
        operation::{DTypeClass, ForwardContext, GradContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

fn pow_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        f64::powf,
        |x, y| x.wrapping_pow(y.max(0) as u32),
    )?])
}

// d(x^y)/dx = y * x^(y-1), d(x^y)/dy = x^y * ln(x)
fn pow_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (x, y, out, dout) = (ctx.input(0), ctx.input(1), ctx.output(0), ctx.dout(0));
    let none = Attributes::new;
    let y_minus_one = ctx.call1("Sub", &[y.into(), ctx.constant(1, 1.0).into()], none())?;
    let lowered = ctx.call1("Pow", &[x.into(), y_minus_one.into()], none())?;
    let local = ctx.call1("Mul", &[y.into(), lowered.into()], none())?;
    let dx = ctx.call1("Mul", &[dout.into(), local.into()], none())?;

    let log_x = ctx.call1("Log", &[x.into()], none())?;
    let local = ctx.call1("Mul", &[out.into(), log_x.into()], none())?;
    let dy = ctx.call1("Mul", &[dout.into(), local.into()], none())?;
    Ok(vec![
        Some(sum_to_shape(ctx, &dx, x.shape())?),
        Some(sum_to_shape(ctx, &dy, y.shape())?),
    ])
}

fn square_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    Ok(vec![map_binary(
        ctx.op,
        x,
        x,
        ctx.output_dtype(0),
        |a, b| a * b,
        i64::wrapping_mul,
    )?])
}

fn square_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let twice = ctx.call1(
        "Mul",
        &[ctx.input(0).into(), ctx.constant(0, 2.0).into()],
        Attributes::new(),
    )?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), twice.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn reciprocal_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| 1.0 / x)])
}

// d(1/x) = -out^2
fn reciprocal_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let squared = ctx.call1("Square", &[ctx.output(0).into()], Attributes::new())?;
    let negated = ctx.call1("Neg", &[squared.into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), negated.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Pow", OpKind::Math, binary_broadcast, pow_forward)
            .input("x", DTypeClass::Float)
            .input("y", DTypeClass::Float)
            .grad(pow_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Square", OpKind::Math, unary_same, square_forward)
            .input("x", DTypeClass::Numeric)
            .grad(square_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Reciprocal", OpKind::Math, unary_same, reciprocal_forward)
            .input("x", DTypeClass::Float)
            .grad(reciprocal_grad),
    )?;
    Ok(())
}
