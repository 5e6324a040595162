//! Array operators: identity, shape queries and layout changes.

use super::{error::Result, registry::Registry};

pub(crate) mod cast;
pub(crate) mod concat;
pub(crate) mod identity;
pub(crate) mod query;
pub(crate) mod reshape;
pub(crate) mod select;
pub(crate) mod squeeze;
pub(crate) mod transpose;

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    identity::register(registry)?;
    query::register(registry)?;
    reshape::register(registry)?;
    squeeze::register(registry)?;
    transpose::register(registry)?;
    cast::register(registry)?;
    concat::register(registry)?;
    select::register(registry)?;
    Ok(())
}
