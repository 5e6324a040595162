use std::fmt;

use crate::tensor_grad::{DType, Tensor, TensorMeta};

use super::{
    error::{OpError, Result},
    operation_ir::{AttrSpec, AttrType, AttrValue, Attributes},
    registry::Registry,
    Value,
};

pub type InferFn = fn(&InferContext) -> Result<Vec<TensorMeta>>;
pub type ForwardFn = fn(&ForwardContext) -> Result<Vec<Tensor>>;
pub type GradFn = fn(&GradContext) -> Result<Vec<Option<Tensor>>>;
/// Construction-time validation of bound attribute values.
pub type CheckFn = fn(&Registry, &Attributes) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Math,
    Array,
    Nn,
    Optimizer,
    ImageTransform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly one tensor.
    Fixed,
    /// The remaining inputs, at least `min` of them, all of one dtype.
    Variadic { min: usize },
    /// A single tuple value holding one or more tensors of one dtype.
    Tuple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DTypeClass {
    Any,
    Float,
    Int,
    Bool,
    Numeric,
    IntOrBool,
    Exact(DType),
}

impl DTypeClass {
    pub fn admits(&self, dtype: DType) -> bool {
        match self {
            DTypeClass::Any => true,
            DTypeClass::Float => dtype.is_float(),
            DTypeClass::Int => dtype.is_int(),
            DTypeClass::Bool => dtype.is_bool(),
            DTypeClass::Numeric => !dtype.is_bool(),
            DTypeClass::IntOrBool => !dtype.is_float(),
            DTypeClass::Exact(expected) => *expected == dtype,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DTypeClass::Any => "a tensor".to_string(),
            DTypeClass::Float => "a float tensor".to_string(),
            DTypeClass::Int => "an integer tensor".to_string(),
            DTypeClass::Bool => "a bool tensor".to_string(),
            DTypeClass::Numeric => "a numeric tensor".to_string(),
            DTypeClass::IntOrBool => "an integer or bool tensor".to_string(),
            DTypeClass::Exact(dtype) => format!("a {} tensor", dtype),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputSlot {
    pub name: &'static str,
    pub arity: Arity,
    pub dtypes: DTypeClass,
}

#[derive(Clone, Copy)]
pub enum OutputArity {
    Fixed(usize),
    /// Derived from the bound attributes and the number of supplied inputs.
    Computed(fn(&Attributes, usize) -> usize),
}

impl OutputArity {
    pub fn count(&self, attrs: &Attributes, inputs: usize) -> usize {
        match self {
            OutputArity::Fixed(count) => *count,
            OutputArity::Computed(rule) => rule(attrs, inputs),
        }
    }
}

impl fmt::Debug for OutputArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputArity::Fixed(count) => write!(f, "Fixed({})", count),
            OutputArity::Computed(_) => write!(f, "Computed"),
        }
    }
}

/// A registered operator: schema plus inference, forward and gradient rules.
pub struct OperatorDescriptor {
    name: &'static str,
    kind: OpKind,
    inputs: Vec<InputSlot>,
    attrs: Vec<AttrSpec>,
    outputs: OutputArity,
    infer: InferFn,
    forward: ForwardFn,
    grad: Option<GradFn>,
    check: Option<CheckFn>,
}

impl OperatorDescriptor {
    pub fn new(name: &'static str, kind: OpKind, infer: InferFn, forward: ForwardFn) -> Self {
        OperatorDescriptor {
            name,
            kind,
            inputs: vec![],
            attrs: vec![],
            outputs: OutputArity::Fixed(1),
            infer,
            forward,
            grad: None,
            check: None,
        }
    }

    pub fn input(mut self, name: &'static str, dtypes: DTypeClass) -> Self {
        self.inputs.push(InputSlot {
            name,
            arity: Arity::Fixed,
            dtypes,
        });
        self
    }

    /// Trailing slot absorbing the remaining inputs.
    pub fn variadic(mut self, name: &'static str, min: usize, dtypes: DTypeClass) -> Self {
        self.inputs.push(InputSlot {
            name,
            arity: Arity::Variadic { min },
            dtypes,
        });
        self
    }

    pub fn tuple(mut self, name: &'static str, dtypes: DTypeClass) -> Self {
        self.inputs.push(InputSlot {
            name,
            arity: Arity::Tuple,
            dtypes,
        });
        self
    }

    pub fn attr(mut self, name: &'static str, ty: AttrType) -> Self {
        self.attrs.push(AttrSpec {
            name,
            ty,
            default: None,
        });
        self
    }

    pub fn attr_default(
        mut self,
        name: &'static str,
        ty: AttrType,
        default: impl Into<AttrValue>,
    ) -> Self {
        self.attrs.push(AttrSpec {
            name,
            ty,
            default: Some(default.into()),
        });
        self
    }

    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = OutputArity::Fixed(count);
        self
    }

    pub fn outputs_with(mut self, rule: fn(&Attributes, usize) -> usize) -> Self {
        self.outputs = OutputArity::Computed(rule);
        self
    }

    pub fn grad(mut self, rule: GradFn) -> Self {
        self.grad = Some(rule);
        self
    }

    pub fn check(mut self, rule: CheckFn) -> Self {
        self.check = Some(rule);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn input_slots(&self) -> &[InputSlot] {
        &self.inputs
    }

    pub fn attr_specs(&self) -> &[AttrSpec] {
        &self.attrs
    }

    pub fn output_arity(&self) -> OutputArity {
        self.outputs
    }

    pub fn has_gradient(&self) -> bool {
        self.grad.is_some()
    }

    pub(crate) fn infer_rule(&self) -> InferFn {
        self.infer
    }

    pub(crate) fn forward_rule(&self) -> ForwardFn {
        self.forward
    }

    pub(crate) fn grad_rule(&self) -> Option<GradFn> {
        self.grad
    }

    pub(crate) fn check_rule(&self) -> Option<CheckFn> {
        self.check
    }
}

impl fmt::Debug for OperatorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("attrs", &self.attrs)
            .field("outputs", &self.outputs)
            .field("has_gradient", &self.grad.is_some())
            .finish()
    }
}

/// Input metadata grouped per slot, handed to an inference rule.
pub struct InferContext<'a> {
    pub op: &'a str,
    pub registry: &'a Registry,
    pub inputs: Vec<Vec<TensorMeta>>,
    pub attrs: &'a Attributes,
}

impl<'a> InferContext<'a> {
    /// First (for fixed slots, only) tensor of `slot`.
    pub fn input(&self, slot: usize) -> &TensorMeta {
        &self.inputs[slot][0]
    }

    pub fn slot(&self, slot: usize) -> &[TensorMeta] {
        &self.inputs[slot]
    }
}

/// Input tensors grouped per slot plus the inferred output metadata.
pub struct ForwardContext<'a> {
    pub op: &'a str,
    pub registry: &'a Registry,
    pub inputs: Vec<Vec<Tensor>>,
    pub attrs: &'a Attributes,
    pub outputs: &'a [TensorMeta],
}

impl<'a> ForwardContext<'a> {
    pub fn input(&self, slot: usize) -> &Tensor {
        &self.inputs[slot][0]
    }

    pub fn slot(&self, slot: usize) -> &[Tensor] {
        &self.inputs[slot]
    }

    pub fn output_dtype(&self, index: usize) -> DType {
        self.outputs[index].dtype
    }

    pub fn call(&self, op: &str, inputs: &[Value], attrs: Attributes) -> Result<Vec<Tensor>> {
        self.registry.execute(op, inputs, &attrs)
    }

    pub fn call1(&self, op: &str, inputs: &[Value], attrs: Attributes) -> Result<Tensor> {
        first_output(op, self.call(op, inputs, attrs)?)
    }
}

/// Recorded tensors of one invocation, handed to its gradient rule.
///
/// `inputs` is flattened across slots; the rule returns one optional
/// sensitivity per entry.
pub struct GradContext<'a> {
    pub op: &'a str,
    pub registry: &'a Registry,
    pub inputs: &'a [Tensor],
    pub outputs: &'a [Tensor],
    pub output_grads: &'a [Tensor],
    pub attrs: &'a Attributes,
}

impl<'a> GradContext<'a> {
    pub fn input(&self, index: usize) -> &Tensor {
        &self.inputs[index]
    }

    pub fn output(&self, index: usize) -> &Tensor {
        &self.outputs[index]
    }

    /// Sensitivity of output `index`.
    pub fn dout(&self, index: usize) -> &Tensor {
        &self.output_grads[index]
    }

    pub fn call(&self, op: &str, inputs: &[Value], attrs: Attributes) -> Result<Vec<Tensor>> {
        self.registry.execute(op, inputs, &attrs)
    }

    pub fn call1(&self, op: &str, inputs: &[Value], attrs: Attributes) -> Result<Tensor> {
        first_output(op, self.call(op, inputs, attrs)?)
    }

    /// Scalar of the dtype of input `index`, for composing with constants.
    pub fn constant(&self, index: usize, value: f64) -> Tensor {
        Tensor::full(self.inputs[index].dtype(), &[], value)
    }
}

pub(crate) fn first_output(op: &str, outputs: Vec<Tensor>) -> Result<Tensor> {
    let count = outputs.len();
    outputs.into_iter().next().ok_or_else(|| OpError::ArityError {
        op: op.to_string(),
        expected: "at least 1 output".to_string(),
        actual: count,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dtype_classes() {
        assert!(DTypeClass::Numeric.admits(DType::U8));
        assert!(!DTypeClass::Numeric.admits(DType::Bool));
        assert!(DTypeClass::IntOrBool.admits(DType::Bool));
        assert!(!DTypeClass::Float.admits(DType::I32));
        assert!(DTypeClass::Exact(DType::I64).admits(DType::I64));
        assert_eq!(DTypeClass::Float.describe(), "a float tensor");
    }

    #[test]
    fn computed_output_arity() {
        let arity = OutputArity::Computed(|_, inputs| inputs * 2);
        assert_eq!(arity.count(&Attributes::new(), 3), 6);
        assert_eq!(OutputArity::Fixed(2).count(&Attributes::new(), 9), 2);
    }
}
