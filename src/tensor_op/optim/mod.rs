//! Parameter update rules. Each returns the updated state tensors rather than
//! mutating its inputs, and none has a gradient.

use super::{
    error::{OpError, Result},
    operation_ir::Attributes,
    registry::Registry,
};

pub(crate) mod ftrl;
pub(crate) mod momentum;
pub(crate) mod sgd;

/// Rejects a float attribute outside the range `admits` accepts.
pub(crate) fn require(
    op: &str,
    attrs: &Attributes,
    name: &str,
    expected: &str,
    admits: impl Fn(f64) -> bool,
) -> Result<f64> {
    let value = attrs.float(op, name)?;
    if !admits(value) {
        return Err(OpError::attribute_type(op, name, expected, value.to_string()));
    }
    Ok(value)
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    sgd::register(registry)?;
    momentum::register(registry)?;
    ftrl::register(registry)?;
    Ok(())
}
