use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

/// The permutation to apply; an empty `perm` reverses the axes.
fn permutation(op: &str, attrs: &Attributes, rank: usize) -> Result<Vec<usize>> {
    let perm = attrs.ints(op, "perm")?;
    if perm.is_empty() {
        return Ok((0..rank).rev().collect());
    }
    let mut seen = vec![false; rank];
    let valid = perm.len() == rank
        && perm.iter().all(|&axis| {
            let fresh = axis >= 0 && (axis as usize) < rank && !seen[axis as usize];
            if fresh {
                seen[axis as usize] = true;
            }
            fresh
        });
    if !valid {
        return Err(OpError::attribute_type(
            op,
            "perm",
            format!("a permutation of 0..{}", rank),
            format!("{:?}", perm),
        ));
    }
    Ok(perm.into_iter().map(|axis| axis as usize).collect())
}

fn transpose_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let x = ctx.input(0);
    let perm = permutation(ctx.op, ctx.attrs, x.rank())?;
    Ok(vec![x.with_shape(perm.iter().map(|&axis| x.shape[axis]).collect())])
}

fn transpose_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let perm = permutation(ctx.op, ctx.attrs, x.rank())?;
    let positions = x.positions()?.permuted_axes(perm);
    Ok(vec![x.gather(&positions)])
}

fn transpose_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let perm = permutation(ctx.op, ctx.attrs, ctx.input(0).rank())?;
    let mut inverse = vec![0_usize; perm.len()];
    for (position, &axis) in perm.iter().enumerate() {
        inverse[axis] = position;
    }
    let dx = ctx.call1(
        "Transpose",
        &[ctx.dout(0).into()],
        Attributes::new().with("perm", inverse),
    )?;
    Ok(vec![Some(dx)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Transpose", OpKind::Array, transpose_infer, transpose_forward)
            .input("x", DTypeClass::Any)
            .attr_default("perm", AttrType::Ints, Vec::<i64>::new())
            .grad(transpose_grad),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::tensor_grad::DType;

    use super::*;

    fn transpose(x: &Tensor, perm: Vec<i64>) -> Result<Tensor> {
        Registry::global().execute1(
            "Transpose",
            &[x.into()],
            &Attributes::new().with("perm", perm),
        )
    }

    #[test]
    fn check_transpose() {
        let x = Tensor::from_vec(vec![2, 3], vec![1_i32, 2, 3, 4, 5, 6]).unwrap();
        let out = transpose(&x, vec![]).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.to_vec::<i32>(), Some(vec![1, 4, 2, 5, 3, 6]));
    }

    #[test]
    fn three_axis_permutation() {
        let x = Tensor::from_vec(vec![1, 2, 3], (0..6).map(|v| v as f32).collect()).unwrap();
        let out = transpose(&x, vec![2, 0, 1]).unwrap();
        assert_eq!(out.shape(), &[3, 1, 2]);
        assert_eq!(out.read(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn perm_must_be_a_permutation() {
        let x = Tensor::zeros(DType::F32, &[2, 2]);
        for perm in vec![vec![0, 0], vec![0], vec![0, 2]] {
            let err = transpose(&x, perm).unwrap_err();
            assert_eq!(err.attribute(), Some("perm"));
        }
    }
}
