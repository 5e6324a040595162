use ndarray::Ix2;

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{binary_broadcast, same_dtype},
        kernel::{layout_error, map_binary, sum_to_shape},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

fn mul_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| x * y,
        i64::wrapping_mul,
    )?])
}

fn mul_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (x, y, dout) = (ctx.input(0), ctx.input(1), ctx.dout(0));
    let dx = ctx.call1("Mul", &[dout.into(), y.into()], Attributes::new())?;
    let dy = ctx.call1("Mul", &[dout.into(), x.into()], Attributes::new())?;
    Ok(vec![
        Some(sum_to_shape(ctx, &dx, x.shape())?),
        Some(sum_to_shape(ctx, &dy, y.shape())?),
    ])
}

fn matrix_dims(op: &str, name: &str, meta: &TensorMeta, transpose: bool) -> Result<(usize, usize)> {
    if meta.rank() != 2 {
        return Err(OpError::shape(
            op,
            None,
            2,
            meta.rank(),
            format!("{} must be a matrix, got rank {}", name, meta.rank()),
        ));
    }
    Ok(if transpose {
        (meta.shape[1], meta.shape[0])
    } else {
        (meta.shape[0], meta.shape[1])
    })
}

fn matmul_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (a, b) = (ctx.input(0), ctx.input(1));
    same_dtype(ctx.op, "b", a.dtype, b.dtype)?;
    let transpose_a = ctx.attrs.bool(ctx.op, "transpose_a")?;
    let transpose_b = ctx.attrs.bool(ctx.op, "transpose_b")?;
    let (m, k) = matrix_dims(ctx.op, "a", a, transpose_a)?;
    let (inner, n) = matrix_dims(ctx.op, "b", b, transpose_b)?;
    if k != inner {
        return Err(OpError::shape(
            ctx.op,
            Some(if transpose_a { 0 } else { 1 }),
            k,
            inner,
            format!(
                "contraction dimensions differ: a{:?} vs b{:?}",
                a.shape, b.shape
            ),
        ));
    }
    Ok(vec![TensorMeta::new(vec![m, n], a.dtype)])
}

fn matmul_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let as_matrix = |tensor: &Tensor, transpose: bool| -> Result<ndarray::Array2<f64>> {
        let matrix = tensor
            .to_array()?
            .into_dimensionality::<Ix2>()
            .map_err(|err| layout_error(ctx.op, err))?;
        Ok(if transpose {
            matrix.reversed_axes()
        } else {
            matrix
        })
    };
    let a = as_matrix(ctx.input(0), ctx.attrs.bool(ctx.op, "transpose_a")?)?;
    let b = as_matrix(ctx.input(1), ctx.attrs.bool(ctx.op, "transpose_b")?)?;
    Ok(vec![Tensor::from_array(
        ctx.output_dtype(0),
        &a.dot(&b).into_dyn(),
    )])
}

fn matmul(ctx: &GradContext, a: &Tensor, b: &Tensor, transpose_a: bool, transpose_b: bool) -> Result<Tensor> {
    ctx.call1(
        "MatMul",
        &[a.into(), b.into()],
        Attributes::new()
            .with("transpose_a", transpose_a)
            .with("transpose_b", transpose_b),
    )
}

fn matmul_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (a, b, dout) = (ctx.input(0), ctx.input(1), ctx.dout(0));
    let transpose_a = ctx.attrs.bool(ctx.op, "transpose_a")?;
    let transpose_b = ctx.attrs.bool(ctx.op, "transpose_b")?;
    let (da, db) = match (transpose_a, transpose_b) {
        (false, false) => (
            matmul(ctx, dout, b, false, true)?,
            matmul(ctx, a, dout, true, false)?,
        ),
        (false, true) => (
            matmul(ctx, dout, b, false, false)?,
            matmul(ctx, dout, a, true, false)?,
        ),
        (true, false) => (
            matmul(ctx, b, dout, false, true)?,
            matmul(ctx, a, dout, false, false)?,
        ),
        (true, true) => (
            matmul(ctx, b, dout, true, true)?,
            matmul(ctx, dout, a, true, true)?,
        ),
    };
    Ok(vec![Some(da), Some(db)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Mul", OpKind::Math, binary_broadcast, mul_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric)
            .grad(mul_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("MatMul", OpKind::Nn, matmul_infer, matmul_forward)
            .input("a", DTypeClass::Numeric)
            .input("b", DTypeClass::Numeric)
            .attr_default("transpose_a", AttrType::Bool, false)
            .attr_default("transpose_b", AttrType::Bool, false)
            .grad(matmul_grad),
    )?;
    Ok(())
}
