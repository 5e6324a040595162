//! Image transforms over `[height, width, channels]` tensors.
//!
//! Every transform takes an optional non-negative `seed`. Seeded transforms
//! draw from a `StdRng` and are reproducible; unseeded ones use the thread
//! generator.

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::tensor_grad::TensorMeta;

use super::{
    error::{OpError, Result},
    registry::Registry,
};

pub(crate) mod crop;
pub(crate) mod flip;
pub(crate) mod uniform_augment;

pub(crate) fn rng_for(seed: i64) -> Box<dyn RngCore> {
    if seed < 0 {
        Box::new(rand::thread_rng())
    } else {
        Box::new(StdRng::seed_from_u64(seed as u64))
    }
}

/// Height, width and channels of an HWC image.
pub(crate) fn image_dims(op: &str, image: &TensorMeta) -> Result<(usize, usize, usize)> {
    match image.shape[..] {
        [height, width, channels] => Ok((height, width, channels)),
        _ => Err(OpError::shape(
            op,
            None,
            3,
            image.rank(),
            format!("expected an HWC image, got shape {:?}", image.shape),
        )),
    }
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    crop::register(registry)?;
    flip::register(registry)?;
    uniform_augment::register(registry)?;
    Ok(())
}
