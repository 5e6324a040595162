use std::{collections::HashMap, sync::Arc};

use lazy_static::lazy_static;
use log::{debug, error};

use crate::tensor_grad::Tensor;

use super::{
    dispatch,
    error::{OpError, Result},
    operation::{first_output, OperatorDescriptor},
    operation_ir::Attributes,
    register_builtins, Value,
};

lazy_static! {
    static ref GLOBAL: Registry = match Registry::with_builtins() {
        Ok(registry) => registry,
        Err(err) => {
            error!("Built-in operator catalogue is inconsistent: {}", err);
            panic!("built-in operators failed to register: {}", err)
        }
    };
}

/// Catalogue of operators by name.
///
/// Populated during initialisation and read-only once shared; lookups take no
/// locks.
#[derive(Debug, Default)]
pub struct Registry {
    operators: HashMap<&'static str, Arc<OperatorDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// A fresh registry holding every built-in operator.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Registry::new();
        register_builtins(&mut registry)?;
        debug!("Registered {} built-in operators", registry.len());
        Ok(registry)
    }

    /// The process-wide registry, built on first use.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    pub fn register(&mut self, descriptor: OperatorDescriptor) -> Result<Arc<OperatorDescriptor>> {
        let name = descriptor.name();
        if self.operators.contains_key(name) {
            return Err(OpError::DuplicateOperator {
                name: name.to_string(),
            });
        }
        let descriptor = Arc::new(descriptor);
        self.operators.insert(name, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Makes `alias` resolve to the descriptor registered as `name`.
    pub fn alias(&mut self, alias: &'static str, name: &str) -> Result<()> {
        if self.operators.contains_key(alias) {
            return Err(OpError::DuplicateOperator {
                name: alias.to_string(),
            });
        }
        let descriptor = Arc::clone(self.lookup(name)?);
        self.operators.insert(alias, descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<OperatorDescriptor>> {
        self.operators
            .get(name)
            .ok_or_else(|| OpError::UnknownOperator {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Registered names, aliases included, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.operators.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Looks up `name` and runs it forward.
    pub fn execute(&self, name: &str, inputs: &[Value], attrs: &Attributes) -> Result<Vec<Tensor>> {
        dispatch::execute(self, self.lookup(name)?, inputs, attrs)
    }

    pub fn execute1(&self, name: &str, inputs: &[Value], attrs: &Attributes) -> Result<Tensor> {
        first_output(name, self.execute(name, inputs, attrs)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        tensor_grad::{DType, TensorMeta},
        tensor_op::{
            infer::unary_same,
            operation::{DTypeClass, ForwardContext, OpKind},
        },
    };

    fn passthrough(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
        Ok(vec![ctx.input(0).clone()])
    }

    fn custom() -> OperatorDescriptor {
        OperatorDescriptor::new("Passthrough", OpKind::Array, unary_same, passthrough)
            .input("x", DTypeClass::Any)
    }

    #[test]
    fn lookup_returns_same_descriptor() {
        let registry = Registry::global();
        let first = registry.lookup("MatMul").unwrap();
        let second = registry.lookup("MatMul").unwrap();
        assert!(Arc::ptr_eq(first, second));
    }

    #[test]
    fn builtins_register_cleanly() {
        let mut registry = Registry::new();
        register_builtins(&mut registry).unwrap();
        assert_eq!(registry.len(), Registry::global().len());
        assert!(registry.names().contains(&"TensorAdd"));
    }

    #[test]
    fn builtin_registration_errors_propagate() {
        let fresh = Registry::with_builtins().unwrap();
        assert_eq!(fresh.len(), Registry::global().len());

        let mut registry = Registry::new();
        registry.register(custom()).unwrap();
        register_builtins(&mut registry).unwrap();
        let err = register_builtins(&mut registry).unwrap_err();
        assert!(matches!(err, OpError::DuplicateOperator { .. }));
    }

    #[test]
    fn duplicate_and_unknown_operators() {
        let mut registry = Registry::new();
        registry.register(custom()).unwrap();
        assert_eq!(
            registry.register(custom()).unwrap_err(),
            OpError::DuplicateOperator {
                name: "Passthrough".to_string()
            }
        );
        assert!(matches!(
            registry.lookup("Conv9D"),
            Err(OpError::UnknownOperator { .. })
        ));
    }

    #[test]
    fn alias_shares_descriptor() {
        let registry = Registry::global();
        assert!(Arc::ptr_eq(
            registry.lookup("TensorAdd").unwrap(),
            registry.lookup("Add").unwrap()
        ));
    }

    #[test]
    fn custom_registry_executes() {
        let mut registry = Registry::new();
        registry.register(custom()).unwrap();
        let x = Tensor::ones(DType::I32, &[2]);
        let out = registry
            .execute1("Passthrough", &[x.clone().into()], &Attributes::new())
            .unwrap();
        assert_eq!(out.meta(), TensorMeta::new(vec![2], DType::I32));
    }
}
