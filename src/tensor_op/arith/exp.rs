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

fn exp_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::exp)])
}

fn exp_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dx = ctx.call1(
        "Mul",
        &[ctx.dout(0).into(), ctx.output(0).into()],
        Attributes::new(),
    )?;
    Ok(vec![Some(dx)])
}

fn log_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_unary(ctx.input(0), ctx.output_dtype(0), f64::ln)])
}

fn log_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dx = ctx.call1(
        "RealDiv",
        &[ctx.dout(0).into(), ctx.input(0).into()],
        Attributes::new(),
    )?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Exp", OpKind::Math, unary_same, exp_forward)
            .input("x", DTypeClass::Float)
            .grad(exp_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("Log", OpKind::Math, unary_same, log_forward)
            .input("x", DTypeClass::Float)
            .grad(log_grad),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exp_then_log() {
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![3], vec![0.0_f64, 1.0, -2.0]).unwrap();
        let e = registry
            .execute1("Exp", &[x.clone().into()], &Attributes::new())
            .unwrap();
        let back = registry
            .execute1("Log", &[e.into()], &Attributes::new())
            .unwrap();
        for (got, want) in back.read().iter().zip(x.read()) {
            assert!((got - want).abs() < 1e-12);
        }
    }
}
