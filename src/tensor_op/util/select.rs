use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{same_dtype, same_shape},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::Attributes,
        registry::Registry,
    },
};

/// Elementwise choice between `x` (where `cond` holds) and `y`; all three
/// share one shape.
fn select_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (cond, x, y) = (ctx.input(0), ctx.input(1), ctx.input(2));
    same_dtype(ctx.op, "y", x.dtype, y.dtype)?;
    same_shape(ctx.op, &cond.shape, &x.shape)?;
    same_shape(ctx.op, &cond.shape, &y.shape)?;
    Ok(vec![x.clone()])
}

fn select_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let (cond, x, y) = (ctx.input(0), ctx.input(1), ctx.input(2));
    let mut both = x.data().clone();
    if !both.extend(y.data()) {
        return Err(OpError::mismatch(ctx.op, 0, x.dtype().to_string(), y.dtype().to_string()));
    }
    let offset = x.numel();
    let mask = cond.data().to_i64_vec();
    let chosen = cond
        .positions()?
        .mapv(|at| if mask[at] != 0 { at } else { at + offset });
    let source = Tensor::from_parts(x.dtype(), vec![offset * 2], both);
    Ok(vec![source.gather(&chosen)])
}

fn select_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (cond, dout) = (ctx.input(0), ctx.dout(0));
    let zeros = ctx.call1("ZerosLike", &[dout.into()], Attributes::new())?;
    let dx = ctx.call1(
        "Select",
        &[cond.into(), dout.into(), (&zeros).into()],
        Attributes::new(),
    )?;
    let dy = ctx.call1(
        "Select",
        &[cond.into(), zeros.into(), dout.into()],
        Attributes::new(),
    )?;
    Ok(vec![None, Some(dx), Some(dy)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Select", OpKind::Array, select_infer, select_forward)
            .input("cond", DTypeClass::Bool)
            .input("x", DTypeClass::Any)
            .input("y", DTypeClass::Any)
            .grad(select_grad),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::tensor_grad::DType;

    use super::*;

    #[test]
    fn select_picks_per_element() {
        let cond = Tensor::from_vec(vec![2, 2], vec![true, false, false, true]).unwrap();
        let x = Tensor::from_vec(vec![2, 2], vec![1_u32, 2, 3, 4]).unwrap();
        let y = Tensor::from_vec(vec![2, 2], vec![10_u32, 20, 30, 40]).unwrap();
        let out = Registry::global()
            .execute1("Select", &[cond.into(), x.into(), y.into()], &Attributes::new())
            .unwrap();
        assert_eq!(out.to_vec::<u32>(), Some(vec![1, 20, 30, 4]));
    }

    #[test]
    fn select_needs_bool_condition_and_equal_shapes() {
        let registry = Registry::global();
        let x = Tensor::zeros(DType::F32, &[2]);
        let err = registry
            .execute("Select", &[x.clone().into(), x.clone().into(), x.clone().into()], &Attributes::new())
            .unwrap_err();
        assert_eq!(err.attribute(), Some("cond"));

        let cond = Tensor::zeros(DType::Bool, &[3]);
        let err = registry
            .execute("Select", &[cond.into(), x.clone().into(), x.into()], &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { dim: Some(0), .. }));
    }
}
