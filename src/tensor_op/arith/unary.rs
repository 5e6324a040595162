//! Elementwise unary maths.

use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        infer::unary_same,
        kernel::map_unary,
        operation::{DTypeClass, ForwardContext, GradContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

fn neg_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| -x)])
}

fn neg_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    Ok(vec![Some(ctx.call1(
        "Neg",
        &[ctx.dout(0).into()],
        Attributes::new(),
    )?)])
}

fn abs_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::abs)])
}

fn abs_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let sign = ctx.call1("Sign", &[ctx.input(0).into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), sign.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn sin_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::sin)])
}

fn sin_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let cos = ctx.call1("Cos", &[ctx.input(0).into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), cos.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn cos_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::cos)])
}

fn cos_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let sin = ctx.call1("Sin", &[ctx.input(0).into()], Attributes::new())?;
    let negated = ctx.call1("Neg", &[sin.into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), negated.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

// Sign of zero is zero.
fn sign_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| {
        if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }
    })])
}

fn floor_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::floor)])
}

fn ceil_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::ceil)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Neg", OpKind::Math, unary_same, neg_forward)
            .input("x", DTypeClass::Numeric)
            .grad(neg_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Abs", OpKind::Math, unary_same, abs_forward)
            .input("x", DTypeClass::Numeric)
            .grad(abs_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Sin", OpKind::Math, unary_same, sin_forward)
            .input("x", DTypeClass::Float)
            .grad(sin_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Cos", OpKind::Math, unary_same, cos_forward)
            .input("x", DTypeClass::Float)
            .grad(cos_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Sign", OpKind::Math, unary_same, sign_forward)
            .input("x", DTypeClass::Numeric),
    )?;
    registry.register(
        OperatorDescriptor::new("Floor", OpKind::Math, unary_same, floor_forward)
            .input("x", DTypeClass::Float),
    )?;
    registry.register(
        OperatorDescriptor::new("Ceil", OpKind::Math, unary_same, ceil_forward)
            .input("x", DTypeClass::Float),
    )?;
    Ok(())
}
