use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::Result,
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

/// `sum(x^2) / 2` as a scalar.
fn l2_loss_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    Ok(vec![TensorMeta::scalar(ctx.input(0).dtype)])
}

fn l2_loss_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let total: f64 = ctx.input(0).read().iter().map(|x| x * x).sum();
    Ok(vec![Tensor::full(ctx.output_dtype(0), &[], total / 2.0)])
}

fn l2_loss_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dx = ctx.call1(
        "Mul",
        &[ctx.input(0).into(), ctx.dout(0).into()],
        Attributes::new(),
    )?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("L2Loss", OpKind::Nn, l2_loss_infer, l2_loss_forward)
            .input("x", DTypeClass::Float)
            .grad(l2_loss_grad),
    )?;
    Ok(())
}
