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

fn relu_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| x.max(0.0))])
}

// The sensitivity at exactly zero is zero.
fn relu_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let x = ctx.input(0);
    let active = ctx.call1(
        "Greater",
        &[x.into(), ctx.constant(0, 0.0).into()],
        Attributes::new(),
    )?;
    let mask = ctx.call1(
        "Cast",
        &[active.into()],
        Attributes::new().with("dst_type", x.dtype()),
    )?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), mask.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn sigmoid_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), |x| {
        1.0 / (1.0 + (-x).exp())
    })])
}

fn sigmoid_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let out = ctx.output(0);
    let complement = ctx.call1(
        "Sub",
        &[ctx.constant(0, 1.0).into(), out.into()],
        Attributes::new(),
    )?;
    let slope = ctx.call1("Mul", &[out.into(), complement.into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), slope.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

fn tanh_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::tanh)])
}

fn tanh_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let squared = ctx.call1("Square", &[ctx.output(0).into()], Attributes::new())?;
    let slope = ctx.call1(
        "Sub",
        &[ctx.constant(0, 1.0).into(), squared.into()],
        Attributes::new(),
    )?;
    let dx = ctx.call1("Mul", &[ctx.dout(0).into(), slope.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("ReLU", OpKind::Nn, unary_same, relu_forward)
            .input("x", DTypeClass::Numeric)
            .grad(relu_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Sigmoid", OpKind::Nn, unary_same, sigmoid_forward)
            .input("x", DTypeClass::Float)
            .grad(sigmoid_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Tanh", OpKind::Nn, unary_same, tanh_forward)
            .input("x", DTypeClass::Float)
            .grad(tanh_grad),
    )?;
    Ok(())
}
