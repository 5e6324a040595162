use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::same_dtype,
        kernel::map_binary,
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

/// Bias over the channel dimension (dimension 1) of an `[N, C, ...]` input.
fn bias_add_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (x, bias) = (ctx.input(0), ctx.input(1));
    same_dtype(ctx.op, "bias", x.dtype, bias.dtype)?;
    if x.rank() < 2 {
        return Err(OpError::shape(
            ctx.op,
            None,
            2,
            x.rank(),
            format!("input must have rank at least 2, got {:?}", x.shape),
        ));
    }
    if bias.rank() != 1 {
        return Err(OpError::shape(
            ctx.op,
            None,
            1,
            bias.rank(),
            format!("bias must have rank 1, got {:?}", bias.shape),
        ));
    }
    if bias.shape[0] != x.shape[1] {
        return Err(OpError::shape(
            ctx.op,
            Some(1),
            x.shape[1],
            bias.shape[0],
            format!(
                "bias of {} values does not match {} channels",
                bias.shape[0], x.shape[1]
            ),
        ));
    }
    Ok(vec![x.clone()])
}

fn bias_add_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let (x, bias) = (ctx.input(0), ctx.input(1));
    let mut channel = vec![1; x.rank()];
    channel[1] = bias.numel();
    let spread = bias.reshape(&channel)?;
    Ok(vec![map_binary(
        ctx.op,
        x,
        &spread,
        ctx.output_dtype(0),
        |x, b| x + b,
        i64::wrapping_add,
    )?])
}

fn bias_add_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dout = ctx.dout(0);
    let others: Vec<usize> = (0..dout.rank()).filter(|&dim| dim != 1).collect();
    let db = ctx.call1(
        "ReduceSum",
        &[dout.into()],
        Attributes::new().with("axis", others),
    )?;
    Ok(vec![Some(dout.clone()), Some(db)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("BiasAdd", OpKind::Nn, bias_add_infer, bias_add_forward)
            .input("x", DTypeClass::Numeric)
            .input("bias", DTypeClass::Numeric)
            .grad(bias_add_grad),
    )?;
    Ok(())
}
