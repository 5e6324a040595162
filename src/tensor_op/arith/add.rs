use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::Result,
        infer::{binary_broadcast, same_shape},
        kernel::{map_binary, sum_to_shape},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

fn add_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| x + y,
        i64::wrapping_add,
    )?])
}

fn add_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dout = ctx.dout(0);
    Ok(vec![
        Some(sum_to_shape(ctx, dout, ctx.input(0).shape())?),
        Some(sum_to_shape(ctx, dout, ctx.input(1).shape())?),
    ])
}

fn sub_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    Ok(vec![map_binary(
        ctx.op,
        ctx.input(0),
        ctx.input(1),
        ctx.output_dtype(0),
        |x, y| x - y,
        i64::wrapping_sub,
    )?])
}

fn sub_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let dout = ctx.dout(0);
    let negated = ctx.call1("Neg", &[dout.into()], Attributes::new())?;
    Ok(vec![
        Some(sum_to_shape(ctx, dout, ctx.input(0).shape())?),
        Some(sum_to_shape(ctx, &negated, ctx.input(1).shape())?),
    ])
}

/// Every summand must have the same shape; no broadcasting.
fn add_n_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let summands = ctx.slot(0);
    for meta in &summands[1..] {
        same_shape(ctx.op, &summands[0].shape, &meta.shape)?;
    }
    Ok(vec![summands[0].clone()])
}

fn add_n_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let summands = ctx.slot(0);
    let mut total = summands[0].clone();
    for summand in &summands[1..] {
        total = map_binary(
            ctx.op,
            &total,
            summand,
            ctx.output_dtype(0),
            |x, y| x + y,
            i64::wrapping_add,
        )?;
    }
    Ok(vec![total])
}

fn add_n_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    Ok(vec![Some(ctx.dout(0).clone()); ctx.inputs.len()])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Add", OpKind::Math, binary_broadcast, add_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric)
            .grad(add_grad),
    )?;
    registry.alias("TensorAdd", "Add")?;
    registry.register(
        OperatorDescriptor::new("Sub", OpKind::Math, binary_broadcast, sub_forward)
            .input("x", DTypeClass::Numeric)
            .input("y", DTypeClass::Numeric)
            .grad(sub_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("AddN", OpKind::Math, add_n_infer, add_n_forward)
            .variadic("inputs", 1, DTypeClass::Numeric)
            .grad(add_n_grad),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{
        tensor_grad::DType,
        tensor_op::{error::OpError, Value},
    };

    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn add_broadcasts_row() {
        init();
        let x = Tensor::from_vec(vec![2, 2], vec![1_f32, 2., 3., 4.]).unwrap();
        let b = Tensor::from_vec(vec![2], vec![10_f32, 20.]).unwrap();
        let out = Registry::global()
            .execute1("TensorAdd", &[x.into(), b.into()], &Attributes::new())
            .unwrap();
        assert_eq!(out.read(), vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn add_rejects_mixed_dtypes() {
        init();
        let x = Tensor::ones(DType::F32, &[2]);
        let y = Tensor::ones(DType::F64, &[2]);
        let err = Registry::global()
            .execute("Add", &[x.into(), y.into()], &Attributes::new())
            .unwrap_err();
        assert_eq!(err.attribute(), Some("y"));
    }

    #[test]
    fn add_n_sums_and_checks_shapes() {
        init();
        let registry = Registry::global();
        let inputs: Vec<Value> = (1..=3)
            .map(|i| Tensor::full(DType::I32, &[2], i as f64).into())
            .collect();
        let out = registry.execute1("AddN", &inputs, &Attributes::new()).unwrap();
        assert_eq!(out.to_vec::<i32>(), Some(vec![6, 6]));

        let mismatched: Vec<Value> = vec![
            Tensor::ones(DType::I32, &[2]).into(),
            Tensor::ones(DType::I32, &[3]).into(),
        ];
        assert!(matches!(
            registry.execute("AddN", &mismatched, &Attributes::new()),
            Err(OpError::ShapeMismatch { dim: Some(0), .. })
        ));
        assert!(matches!(
            registry.execute("AddN", &[], &Attributes::new()),
            Err(OpError::ArityError { .. })
        ));
    }
}
