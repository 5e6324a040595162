use std::sync::Arc;

use log::debug;

use crate::tensor_grad::{Tensor, TensorMeta};

use super::{
    dispatch::execute_bound,
    error::Result,
    infer::{bind_attrs, infer_bound},
    operation::OperatorDescriptor,
    operation_ir::Attributes,
    registry::Registry,
    Value, ValueMeta,
};

/// Tensors seen by the last forward execution of an invocation.
#[derive(Debug, Clone)]
pub struct Record {
    /// Flattened across slots, in slot order.
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

/// An operator bound to validated attributes.
///
/// Attribute errors surface here, at construction, rather than on first
/// execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    descriptor: Arc<OperatorDescriptor>,
    attrs: Attributes,
    record: Option<Record>,
}

impl Invocation {
    pub fn new(registry: &Registry, name: &str, attrs: &Attributes) -> Result<Self> {
        let descriptor = Arc::clone(registry.lookup(name)?);
        Invocation::from_descriptor(registry, descriptor, attrs)
    }

    pub fn from_descriptor(
        registry: &Registry,
        descriptor: Arc<OperatorDescriptor>,
        attrs: &Attributes,
    ) -> Result<Self> {
        let attrs = bind_attrs(registry, &descriptor, attrs)?;
        Ok(Invocation {
            descriptor,
            attrs,
            record: None,
        })
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &Arc<OperatorDescriptor> {
        &self.descriptor
    }

    /// Bound attributes, defaults included.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn infer(&self, registry: &Registry, inputs: &[ValueMeta]) -> Result<Vec<TensorMeta>> {
        infer_bound(registry, &self.descriptor, inputs, &self.attrs)
    }

    /// Runs forward and records inputs and outputs. A failed execution leaves
    /// no record behind.
    pub fn execute(&mut self, registry: &Registry, inputs: &[Value]) -> Result<Vec<Tensor>> {
        self.record = None;
        let record = self.run(registry, inputs)?;
        let outputs = record.outputs.clone();
        self.record = Some(record);
        Ok(outputs)
    }

    /// Runs forward without touching the stored record.
    pub(crate) fn run(&self, registry: &Registry, inputs: &[Value]) -> Result<Record> {
        let outputs = execute_bound(registry, &self.descriptor, inputs, &self.attrs)?;
        debug!("Executed {} producing {} outputs", self.name(), outputs.len());
        Ok(Record {
            inputs: inputs.iter().flat_map(Value::tensors).collect(),
            outputs,
        })
    }

    pub(crate) fn store(&mut self, record: Record) {
        self.record = Some(record);
    }

    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn is_executed(&self) -> bool {
        self.record.is_some()
    }

    pub fn reset(&mut self) {
        self.record = None;
    }
}
