use std::collections::HashSet;

use itertools::Itertools;
use log::trace;

use crate::tensor_grad::{Tensor, TensorMeta};

use super::{
    error::{OpError, Result},
    infer::{bind_attrs, infer_bound, slot_layout},
    operation::{Arity, ForwardContext, OperatorDescriptor},
    operation_ir::Attributes,
    registry::Registry,
    Value,
};

/// Binds attributes, infers, runs the forward rule and checks the result
/// against the inference.
pub fn execute(
    registry: &Registry,
    desc: &OperatorDescriptor,
    inputs: &[Value],
    attrs: &Attributes,
) -> Result<Vec<Tensor>> {
    let bound = bind_attrs(registry, desc, attrs)?;
    execute_bound(registry, desc, inputs, &bound)
}

pub(crate) fn execute_bound(
    registry: &Registry,
    desc: &OperatorDescriptor,
    inputs: &[Value],
    attrs: &Attributes,
) -> Result<Vec<Tensor>> {
    let metas: Vec<_> = inputs.iter().map(Value::meta).collect();
    let inferred = infer_bound(registry, desc, &metas, attrs)?;
    trace!(
        "Dispatching {}({})",
        desc.name(),
        metas.iter().map(|meta| meta.describe()).join(", ")
    );
    let ctx = ForwardContext {
        op: desc.name(),
        registry,
        inputs: group_inputs(desc, inputs)?,
        attrs,
        outputs: &inferred,
    };
    let outputs = distinct_identities(&ctx.inputs, (desc.forward_rule())(&ctx)?);
    verify_outputs(desc.name(), &inferred, &outputs)?;
    Ok(outputs)
}

/// Outputs never share an identity with an input or with each other, so
/// gradients keyed by identity cannot alias.
fn distinct_identities(inputs: &[Vec<Tensor>], outputs: Vec<Tensor>) -> Vec<Tensor> {
    let mut seen: HashSet<_> = inputs.iter().flatten().map(Tensor::id).collect();
    outputs
        .into_iter()
        .map(|tensor| {
            if seen.insert(tensor.id()) {
                tensor
            } else {
                tensor.detached()
            }
        })
        .collect()
}

/// Tensors grouped per slot. Only called after inference accepted `inputs`.
fn group_inputs(desc: &OperatorDescriptor, inputs: &[Value]) -> Result<Vec<Vec<Tensor>>> {
    let layout = slot_layout(desc, inputs.len())?;
    Ok(desc
        .input_slots()
        .iter()
        .zip(layout)
        .map(|(slot, range)| match slot.arity {
            Arity::Tuple => inputs[range.start].tensors(),
            Arity::Fixed | Arity::Variadic { .. } => {
                inputs[range].iter().flat_map(Value::tensors).collect()
            }
        })
        .collect())
}

pub(crate) fn verify_outputs(op: &str, inferred: &[TensorMeta], outputs: &[Tensor]) -> Result<()> {
    if inferred.len() != outputs.len() {
        return Err(OpError::mismatch(
            op,
            outputs.len().min(inferred.len()),
            format!("{} outputs", inferred.len()),
            format!("{} outputs", outputs.len()),
        ));
    }
    for (index, (meta, tensor)) in inferred.iter().zip(outputs).enumerate() {
        let actual = tensor.meta();
        if *meta != actual {
            return Err(OpError::mismatch(op, index, meta.to_string(), actual.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        tensor_grad::DType,
        tensor_op::{
            infer::unary_same,
            operation::{DTypeClass, InferContext, OpKind},
            operation_ir::AttrValue,
        },
    };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn claims_float(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
        Ok(vec![ctx.input(0).with_dtype(DType::F64)])
    }

    fn identity_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
        Ok(vec![ctx.input(0).clone()])
    }

    #[test]
    fn lying_rule_is_an_internal_mismatch() {
        init();
        let mut registry = Registry::new();
        registry
            .register(
                OperatorDescriptor::new("Liar", OpKind::Math, claims_float, identity_forward)
                    .input("x", DTypeClass::Any),
            )
            .unwrap();
        let err = registry
            .execute("Liar", &[Tensor::ones(DType::I32, &[3]).into()], &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, OpError::InternalInferenceMismatch { index: 0, .. }));
        assert!(!err.is_validation());
    }

    #[test]
    fn non_tensor_input_fails_before_forward() {
        init();
        let registry = Registry::global();
        let err = registry
            .execute(
                "Cast",
                &[Value::Const(AttrValue::Str("wrong input".to_string()))],
                &Attributes::new().with("dst_type", DType::I32),
            )
            .unwrap_err();
        assert_eq!(err.attribute(), Some("x"));
        assert!(matches!(err, OpError::AttributeTypeError { .. }));
    }

    #[test]
    fn arity_is_checked() {
        init();
        let mut registry = Registry::new();
        registry
            .register(
                OperatorDescriptor::new("Echo", OpKind::Array, unary_same, identity_forward)
                    .input("x", DTypeClass::Any),
            )
            .unwrap();
        let x: Value = Tensor::ones(DType::F32, &[1]).into();
        match registry.execute("Echo", &[x.clone(), x], &Attributes::new()) {
            Err(OpError::ArityError {
                op,
                expected,
                actual,
            }) => {
                assert_eq!(op, "Echo");
                assert_eq!(expected, "1");
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn undeclared_attribute_is_rejected() {
        init();
        let x: Value = Tensor::ones(DType::F32, &[1]).into();
        let err = Registry::global()
            .execute("Neg", &[x], &Attributes::new().with("alpha", 1.0))
            .unwrap_err();
        assert_eq!(err.attribute(), Some("alpha"));
    }
}
