//! Validation of an invocation against its operator's schema, and the
//! shape/dtype rules shared between operators.

use std::ops::Range;

use itertools::{EitherOrBoth, Itertools};
use log::trace;

use crate::tensor_grad::{DType, TensorMeta};

use super::{
    error::{OpError, Result},
    operation::{Arity, InferContext, InputSlot, OperatorDescriptor},
    operation_ir::Attributes,
    registry::Registry,
    ValueMeta,
};

/// Checks supplied attributes against the schema, fills defaults and runs the
/// operator's construction check.
pub fn bind_attrs(
    registry: &Registry,
    desc: &OperatorDescriptor,
    attrs: &Attributes,
) -> Result<Attributes> {
    let op = desc.name();
    if let Some((name, value)) = attrs
        .iter()
        .find(|(name, _)| !desc.attr_specs().iter().any(|spec| spec.name == name.as_str()))
    {
        return Err(OpError::attribute_type(
            op,
            name,
            "a declared attribute",
            format!("undeclared value {}", value),
        ));
    }
    let mut bound = Attributes::new();
    for spec in desc.attr_specs() {
        let value = match (attrs.get(spec.name), &spec.default) {
            (Some(value), _) => value.clone().conform(spec.ty).ok_or_else(|| {
                OpError::attribute_type(op, spec.name, spec.ty.describe(), value.to_string())
            })?,
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(OpError::attribute_type(
                    op,
                    spec.name,
                    spec.ty.describe(),
                    "nothing",
                ))
            }
        };
        bound.set(spec.name, value);
    }
    if let Some(check) = desc.check_rule() {
        check(registry, &bound)?;
    }
    Ok(bound)
}

/// Range of supplied inputs each slot consumes.
pub(crate) fn slot_layout(desc: &OperatorDescriptor, supplied: usize) -> Result<Vec<Range<usize>>> {
    let slots = desc.input_slots();
    let arity_error = |expected: String| OpError::ArityError {
        op: desc.name().to_string(),
        expected,
        actual: supplied,
    };
    match slots.last().map(|slot| slot.arity) {
        Some(Arity::Variadic { min }) => {
            let fixed = slots.len() - 1;
            if supplied < fixed + min {
                return Err(arity_error(format!("at least {}", fixed + min)));
            }
            let mut layout: Vec<Range<usize>> = (0..fixed).map(|i| i..i + 1).collect();
            layout.push(fixed..supplied);
            Ok(layout)
        }
        _ => {
            if supplied != slots.len() {
                return Err(arity_error(slots.len().to_string()));
            }
            Ok((0..supplied).map(|i| i..i + 1).collect())
        }
    }
}

fn homogeneous(op: &str, slot: &InputSlot, metas: &[TensorMeta]) -> Result<()> {
    for meta in metas {
        if !slot.dtypes.admits(meta.dtype) {
            return Err(OpError::attribute_type(
                op,
                slot.name,
                slot.dtypes.describe(),
                format!("a {} tensor", meta.dtype),
            ));
        }
    }
    if let Some(odd) = metas.iter().find(|meta| meta.dtype != metas[0].dtype) {
        return Err(OpError::attribute_type(
            op,
            slot.name,
            format!("{} tensors throughout", metas[0].dtype),
            format!("a {} tensor", odd.dtype),
        ));
    }
    Ok(())
}

/// Groups input metadata per slot, validating kinds and dtypes.
pub(crate) fn assign_slots(
    desc: &OperatorDescriptor,
    inputs: &[ValueMeta],
) -> Result<Vec<Vec<TensorMeta>>> {
    let op = desc.name();
    let layout = slot_layout(desc, inputs.len())?;
    let mut grouped = Vec::with_capacity(layout.len());
    for (slot, range) in desc.input_slots().iter().zip(layout) {
        let metas = match slot.arity {
            Arity::Tuple => match &inputs[range.start] {
                ValueMeta::Tuple(metas) if !metas.is_empty() => metas.clone(),
                ValueMeta::Tuple(_) => {
                    return Err(OpError::ArityError {
                        op: op.to_string(),
                        expected: format!("a non-empty tuple for {}", slot.name),
                        actual: 0,
                    })
                }
                other => {
                    return Err(OpError::attribute_type(
                        op,
                        slot.name,
                        "a tuple of tensors",
                        other.describe(),
                    ))
                }
            },
            Arity::Fixed | Arity::Variadic { .. } => inputs[range]
                .iter()
                .map(|value| match value {
                    ValueMeta::Tensor(meta) => Ok(meta.clone()),
                    other => Err(OpError::attribute_type(
                        op,
                        slot.name,
                        slot.dtypes.describe(),
                        other.describe(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
        };
        homogeneous(op, slot, &metas)?;
        grouped.push(metas);
    }
    Ok(grouped)
}

/// Validates an invocation and computes its output metadata.
pub fn infer(
    registry: &Registry,
    desc: &OperatorDescriptor,
    inputs: &[ValueMeta],
    attrs: &Attributes,
) -> Result<Vec<TensorMeta>> {
    let bound = bind_attrs(registry, desc, attrs)?;
    infer_bound(registry, desc, inputs, &bound)
}

/// Inference for attributes that have already been bound.
pub(crate) fn infer_bound(
    registry: &Registry,
    desc: &OperatorDescriptor,
    inputs: &[ValueMeta],
    attrs: &Attributes,
) -> Result<Vec<TensorMeta>> {
    let grouped = assign_slots(desc, inputs)?;
    let ctx = InferContext {
        op: desc.name(),
        registry,
        inputs: grouped,
        attrs,
    };
    let outputs = (desc.infer_rule())(&ctx)?;
    let expected = desc.output_arity().count(attrs, inputs.len());
    if outputs.len() != expected {
        return Err(OpError::mismatch(
            desc.name(),
            outputs.len(),
            format!("{} outputs", expected),
            format!("{} outputs", outputs.len()),
        ));
    }
    trace!(
        "Inferred {} -> [{}]",
        desc.name(),
        outputs.iter().map(|meta| meta.to_string()).join(", ")
    );
    Ok(outputs)
}

/// Broadcast result of two shapes, aligned from the trailing dimension.
///
/// A conflict reports the lowest conflicting dimension of the result.
pub fn broadcast_shapes(op: &str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let mut aligned: Vec<(usize, usize)> = lhs
        .iter()
        .rev()
        .zip_longest(rhs.iter().rev())
        .map(|pair| match pair {
            EitherOrBoth::Both(&l, &r) => (l, r),
            EitherOrBoth::Left(&l) => (l, 1),
            EitherOrBoth::Right(&r) => (1, r),
        })
        .collect();
    aligned.reverse();
    aligned
        .into_iter()
        .enumerate()
        .map(|(dim, (l, r))| match (l, r) {
            (l, r) if l == r => Ok(l),
            (1, r) => Ok(r),
            (l, 1) => Ok(l),
            (l, r) => Err(OpError::broadcast(op, dim, l, r)),
        })
        .collect()
}

pub(crate) fn same_dtype(op: &str, name: &str, expected: DType, actual: DType) -> Result<()> {
    if expected != actual {
        return Err(OpError::attribute_type(
            op,
            name,
            format!("a {} tensor", expected),
            format!("a {} tensor", actual),
        ));
    }
    Ok(())
}

pub(crate) fn same_shape(op: &str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(OpError::shape(
            op,
            None,
            expected.len(),
            actual.len(),
            format!("rank {} does not match rank {}", actual.len(), expected.len()),
        ));
    }
    match expected.iter().zip(actual).position(|(e, a)| e != a) {
        Some(dim) => Err(OpError::shape(
            op,
            Some(dim),
            expected[dim],
            actual[dim],
            format!(
                "shape {:?} does not match {:?} at dimension {}",
                actual, expected, dim
            ),
        )),
        None => Ok(()),
    }
}

/// Resolves a possibly negative axis against `rank`. `rank` itself is allowed
/// when `inclusive`, for operators that insert a dimension.
pub(crate) fn normalize_axis(
    op: &str,
    name: &str,
    axis: i64,
    rank: usize,
    inclusive: bool,
) -> Result<usize> {
    let bound = if inclusive { rank as i64 + 1 } else { rank as i64 };
    let resolved = if axis < 0 { axis + bound } else { axis };
    if resolved < 0 || resolved >= bound {
        return Err(OpError::attribute_type(
            op,
            name,
            format!("an axis in [{}, {})", -bound, bound),
            axis.to_string(),
        ));
    }
    Ok(resolved as usize)
}

/// Distinct, sorted axes. An empty list selects every axis.
pub(crate) fn normalize_axes(op: &str, name: &str, axes: &[i64], rank: usize) -> Result<Vec<usize>> {
    if axes.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut resolved = axes
        .iter()
        .map(|&axis| normalize_axis(op, name, axis, rank, false))
        .collect::<Result<Vec<_>>>()?;
    resolved.sort_unstable();
    resolved.dedup();
    Ok(resolved)
}

/// Elementwise output of one input.
pub(crate) fn unary_same(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    Ok(vec![ctx.input(0).clone()])
}

/// Broadcast binary with matching dtypes; the output keeps the dtype.
pub(crate) fn binary_broadcast(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (lhs, rhs) = (ctx.input(0), ctx.input(1));
    same_dtype(ctx.op, "y", lhs.dtype, rhs.dtype)?;
    let shape = broadcast_shapes(ctx.op, &lhs.shape, &rhs.shape)?;
    Ok(vec![TensorMeta::new(shape, lhs.dtype)])
}

/// Broadcast binary producing a bool tensor.
pub(crate) fn binary_predicate(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let outputs = binary_broadcast(ctx)?;
    Ok(outputs
        .into_iter()
        .map(|meta| meta.with_dtype(DType::Bool))
        .collect())
}

impl ValueMeta {
    pub(crate) fn describe(&self) -> String {
        match self {
            ValueMeta::Tensor(meta) => format!("a {} tensor", meta),
            ValueMeta::Tuple(metas) => format!("a tuple of {} tensors", metas.len()),
            ValueMeta::Const(value) => format!("the constant {}", value),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broadcasting_documented_shapes() {
        assert_eq!(broadcast_shapes("Add", &[2, 3], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(
            broadcast_shapes("Add", &[4, 1, 5], &[3, 1]).unwrap(),
            vec![4, 3, 5]
        );
        assert_eq!(broadcast_shapes("Add", &[], &[2, 2]).unwrap(), vec![2, 2]);
        assert_eq!(broadcast_shapes("Add", &[0, 1], &[1, 7]).unwrap(), vec![0, 7]);
    }

    #[test]
    fn broadcasting_reports_lowest_conflict() {
        match broadcast_shapes("Mul", &[2, 3, 4], &[5, 6, 4]) {
            Err(OpError::ShapeMismatch {
                op,
                dim,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(op, "Mul");
                assert_eq!(dim, Some(0));
                assert_eq!((expected, actual), (2, 5));
            }
            other => panic!("unexpected {:?}", other),
        }
        match broadcast_shapes("Mul", &[3, 4], &[2, 3, 5]) {
            Err(OpError::ShapeMismatch { dim, .. }) => assert_eq!(dim, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn axis_normalisation() {
        assert_eq!(normalize_axis("ReduceSum", "axis", -1, 3, false).unwrap(), 2);
        assert_eq!(normalize_axis("ExpandDims", "axis", -1, 3, true).unwrap(), 3);
        assert!(normalize_axis("ReduceSum", "axis", 3, 3, false).is_err());
        assert_eq!(
            normalize_axes("ReduceSum", "axis", &[-1, 0, 2], 3).unwrap(),
            vec![0, 2]
        );
        assert_eq!(normalize_axes("ReduceSum", "axis", &[], 2).unwrap(), vec![0, 1]);
    }
}
