use crate::{
    tensor_grad::Tensor,
    tensor_op::{
        error::Result,
        infer::binary_broadcast,
        kernel::map_binary,
        operation::{DTypeClass, ForwardContext, OpKind, OperatorDescriptor},
        registry::Registry,
    },
};

// Integer inputs only, so the float closure is never taken.
fn bitwise(ctx: &ForwardContext, f: fn(i64, i64) -> i64) -> Result<Tensor> {
    map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| f(x as i64, y as i64) as f64,
        f,
    )
}

fn and_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![bitwise(ctx, |x, y| x & y)?])
}

fn or_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![bitwise(ctx, |x, y| x | y)?])
}

fn xor_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![bitwise(ctx, |x, y| x ^ y)?])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("BitwiseAnd", OpKind::Math, binary_broadcast, and_forward)
            .input("x", DTypeClass::Int)
            .input("y", DTypeClass::Int),
    )?;
    registry.register(
        OperatorDescriptor::new("BitwiseOr", OpKind::Math, binary_broadcast, or_forward)
            .input("x", DTypeClass::Int)
            .input("y", DTypeClass::Int),
    )?;
    registry.register(
        OperatorDescriptor::new("BitwiseXor", OpKind::Math, binary_broadcast, xor_forward)
            .input("x", DTypeClass::Int)
            .input("y", DTypeClass::Int),
    )?;
    Ok(())
}
