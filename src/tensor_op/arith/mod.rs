//! Elementwise arithmetic, comparisons and reductions.

use super::{error::Result, registry::Registry};

pub(crate) mod add;
pub(crate) mod bitwise;
pub(crate) mod compare;
pub(crate) mod div;
pub(crate) mod exp;
pub(crate) mod mean;
pub(crate) mod minmax;
pub(crate) mod multiply;
pub(crate) mod pow;
pub(crate) mod sqrt;
pub(crate) mod sum;
pub(crate) mod unary;

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    add::register(registry)?;
    bitwise::register(registry)?;
    compare::register(registry)?;
    div::register(registry)?;
    exp::register(registry)?;
    mean::register(registry)?;
    minmax::register(registry)?;
    multiply::register(registry)?;
    pow::register(registry)?;
    sqrt::register(registry)?;
    sum::register(registry)?;
    unary::register(registry)?;
    Ok(())
}
