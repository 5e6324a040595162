//! Numeric building blocks shared by the forward rules.

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use crate::tensor_grad::{DType, Tensor, TensorData};

use super::{
    error::{OpError, Result},
    infer::broadcast_shapes,
    operation::GradContext,
    operation_ir::Attributes,
};

pub(crate) fn layout_error(op: &str, err: ndarray::ShapeError) -> OpError {
    OpError::shape(op, None, 0, 0, format!("array layout error: {}", err))
}

pub(crate) fn broadcast_error(op: &str, from: &[usize], to: &[usize]) -> OpError {
    OpError::shape(
        op,
        None,
        to.iter().product(),
        from.iter().product(),
        format!("cannot broadcast {:?} to {:?}", from, to),
    )
}

pub(crate) fn broadcast_to(op: &str, array: &ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    array
        .broadcast(IxDyn(shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| broadcast_error(op, array.shape(), shape))
}

pub(crate) fn map_unary(x: &Tensor, dtype: DType, f: impl Fn(f64) -> f64) -> Tensor {
    let values: Vec<f64> = x.read().into_iter().map(f).collect();
    Tensor::from_parts(
        dtype,
        x.shape().to_vec(),
        TensorData::from_f64(dtype, &values),
    )
}

/// Broadcasting elementwise kernel. Integer and bool operands take the exact
/// `i64` path, floats the `f64` path.
pub(crate) fn map_binary(
    op: &str,
    lhs: &Tensor,
    rhs: &Tensor,
    dtype: DType,
    float: impl Fn(f64, f64) -> f64,
    int: impl Fn(i64, i64) -> i64,
) -> Result<Tensor> {
    let shape = broadcast_shapes(op, lhs.shape(), rhs.shape())?;
    if lhs.dtype().is_float() {
        let (a, b) = (lhs.to_array()?, rhs.to_array()?);
        let a = a
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| broadcast_error(op, lhs.shape(), &shape))?;
        let b = b
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| broadcast_error(op, rhs.shape(), &shape))?;
        let out = Zip::from(a).and(b).map_collect(|&x, &y| float(x, y));
        Ok(Tensor::from_array(dtype, &out))
    } else {
        let (a, b) = (lhs.to_i64_array()?, rhs.to_i64_array()?);
        let a = a
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| broadcast_error(op, lhs.shape(), &shape))?;
        let b = b
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| broadcast_error(op, rhs.shape(), &shape))?;
        let out = Zip::from(a).and(b).map_collect(|&x, &y| int(x, y));
        Ok(Tensor::from_i64_array(dtype, &out))
    }
}

/// Broadcasting predicate producing a bool tensor.
pub(crate) fn compare(
    op: &str,
    lhs: &Tensor,
    rhs: &Tensor,
    float: impl Fn(f64, f64) -> bool,
    int: impl Fn(i64, i64) -> bool,
) -> Result<Tensor> {
    map_binary(
        op,
        lhs,
        rhs,
        DType::Bool,
        |x, y| if float(x, y) { 1.0 } else { 0.0 },
        |x, y| int(x, y) as i64,
    )
}

/// Sums over `axes` (sorted, distinct), keeping them as size-1 dimensions when
/// `keep_dims`.
pub(crate) fn sum_axes(array: &ArrayD<f64>, axes: &[usize], keep_dims: bool) -> ArrayD<f64> {
    let mut reduced = array.clone();
    for &axis in axes.iter().rev() {
        reduced = reduced.sum_axis(Axis(axis));
        if keep_dims {
            reduced = reduced.insert_axis(Axis(axis));
        }
    }
    reduced
}

pub(crate) fn reduced_shape(shape: &[usize], axes: &[usize], keep_dims: bool) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .filter_map(|(dim, &size)| match (axes.contains(&dim), keep_dims) {
            (false, _) => Some(size),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect()
}

/// Axes of `from` that were broadcast to produce it from `to`.
pub(crate) fn broadcast_axes(from: &[usize], to: &[usize]) -> Vec<usize> {
    let lead = from.len().saturating_sub(to.len());
    (0..from.len())
        .filter(|&dim| dim < lead || (to[dim - lead] == 1 && from[dim] != 1))
        .collect()
}

/// Reduces a broadcast sensitivity back to `shape`, composing `ReduceSum` and
/// `Reshape`.
pub(crate) fn sum_to_shape(ctx: &GradContext, grad: &Tensor, shape: &[usize]) -> Result<Tensor> {
    if grad.shape() == shape {
        return Ok(grad.clone());
    }
    let axes = broadcast_axes(grad.shape(), shape);
    let reduced = if axes.is_empty() {
        grad.clone()
    } else {
        ctx.call1(
            "ReduceSum",
            &[grad.into()],
            Attributes::new()
                .with("axis", axes)
                .with("keep_dims", true),
        )?
    };
    ctx.call1(
        "Reshape",
        &[reduced.into()],
        Attributes::new().with("shape", shape),
    )
}

#[cfg(test)]
mod test {
    use ndarray::arr2;

    use super::*;

    #[test]
    fn integer_path_is_exact() {
        let big = (1_i64 << 60) + 3;
        let a = Tensor::from_vec(vec![2], vec![big, 7]).unwrap();
        let b = Tensor::from_vec(vec![1], vec![1_i64]).unwrap();
        let out = map_binary("Add", &a, &b, DType::I64, |x, y| x + y, |x, y| x + y).unwrap();
        assert_eq!(out.to_vec::<i64>(), Some(vec![big + 1, 8]));
    }

    #[test]
    fn broadcast_float_kernel() {
        let a = Tensor::from_vec(vec![2, 1], vec![1.0_f32, 2.0]).unwrap();
        let b = Tensor::from_vec(vec![3], vec![10.0_f32, 20.0, 30.0]).unwrap();
        let out = map_binary("Mul", &a, &b, DType::F32, |x, y| x * y, |x, y| x * y).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.read(), vec![10.0, 20.0, 30.0, 20.0, 40.0, 60.0]);
    }

    #[test]
    fn axis_sums() {
        let array = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
        assert_eq!(sum_axes(&array, &[0], false).into_raw_vec(), vec![4.0, 6.0]);
        let kept = sum_axes(&array, &[0, 1], true);
        assert_eq!(kept.shape(), &[1, 1]);
        assert_eq!(kept.into_raw_vec(), vec![10.0]);
        assert_eq!(reduced_shape(&[2, 3, 4], &[1], false), vec![2, 4]);
        assert_eq!(reduced_shape(&[2, 3, 4], &[1], true), vec![2, 1, 4]);
    }

    #[test]
    fn broadcast_axes_include_leading_dimensions() {
        assert_eq!(broadcast_axes(&[4, 2, 3], &[2, 1]), vec![0, 2]);
        assert_eq!(broadcast_axes(&[2, 3], &[2, 3]), Vec::<usize>::new());
        assert_eq!(broadcast_axes(&[1, 3], &[3]), vec![0]);
    }
}
