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

fn sqrt_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::sqrt)])
}

fn sqrt_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let twice = ctx.call1(
        "Mul",
        &[ctx.output(0).into(), ctx.constant(0, 2.0).into()],
        Attributes::new(),
    )?;
    let dx = ctx.call1("RealDiv", &[ctx.dout(0).into(), twice.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn rsqrt_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| {
        1.0 / x.sqrt()
    })])
}

// d(x^-1/2) = -1/2 * out^3
fn rsqrt_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let cubed = ctx.call1(
        "Pow",
        &[ctx.output(0).into(), ctx.constant(0, 3.0).into()],
        Attributes::new(),
    )?;
    let local = ctx.call1(
        "Mul",
        &[cubed.into(), ctx.constant(0, -0.5).into()],
        Attributes::new(),
    )?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), local.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Sqrt", OpKind::Math, unary_same, sqrt_forward)
            .input("x", DTypeClass::Float)
            .grad(sqrt_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Rsqrt", OpKind::Math, unary_same, rsqrt_forward)
            .input("x", DTypeClass::Float)
            .grad(rsqrt_grad),
    )?;
    Ok(())
}
