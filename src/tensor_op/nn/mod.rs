//! Neural-network layers and losses. `MatMul` lives with the arithmetic
//! operators.

use super::{error::Result, registry::Registry};

pub(crate) mod activation;
pub(crate) mod bias_add;
pub(crate) mod loss;
pub(crate) mod softmax;

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    activation::register(registry)?;
    bias_add::register(registry)?;
    softmax::register(registry)?;
    loss::register(registry)?;
    Ok(())
}
