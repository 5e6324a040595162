//! Metadata queries. Results are `int64` and carry no gradient.

use crate::{
    tensor_grad::{DType, Tensor, TensorMeta},
    tensor_op::{
        error::Result,
        operation::{DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor},
        registry::Registry,
    },
};

fn shape_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    Ok(vec![TensorMeta::new(vec![ctx.input(0).rank()], DType::I64)])
}

fn shape_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let dims: Vec<i64> = x.shape().iter().map(|&dim| dim as i64).collect();
    Ok(vec![Tensor::from_vec(vec![dims.len()], dims)?])
}

fn scalar_infer(_ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    Ok(vec![TensorMeta::scalar(DType::I64)])
}

fn rank_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![Tensor::scalar(ctx.input(0).rank() as i64)])
}

fn size_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![Tensor::scalar(ctx.input(0).numel() as i64)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Shape", OpKind::Array, shape_infer, shape_forward)
            .input("x", DTypeClass::Any),
    )?;
    registry.register(
        OperatorDescriptor::new("Rank", OpKind::Array, scalar_infer, rank_forward)
            .input("x", DTypeClass::Any),
    )?;
    registry.register(
        OperatorDescriptor::new("Size", OpKind::Array, scalar_infer, size_forward)
            .input("x", DTypeClass::Any),
    )?;
    Ok(())
}
