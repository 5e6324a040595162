//! Loss scaling for reduced-precision training.
//!
//! Scaling is a pair of explicit steps around [`Session::backward`]: scale
//! the loss inside the session, differentiate, then unscale the parameter
//! gradients and skip the update when any of them overflowed.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::{
    session::{Handle, Session},
    tensor_grad::Tensor,
    tensor_op::{error::Result, operation_ir::Attributes, registry::Registry},
};

/// Appends `loss * scale` to the session and returns the scaled loss.
pub fn scale_loss(session: &mut Session, loss: Handle, scale: f64) -> Result<Handle> {
    let dtype = session.meta(loss)?.dtype;
    let factor = session.feed(Tensor::full(dtype, &[], scale))?;
    session.apply1("Mul", &[loss.into(), factor.into()], &Attributes::new())
}

/// Divides every gradient by `scale`.
pub fn unscale_grads(
    registry: &Registry,
    grads: &BTreeMap<String, Tensor>,
    scale: f64,
) -> Result<BTreeMap<String, Tensor>> {
    grads
        .iter()
        .map(|(name, grad)| {
            let inverse = Tensor::full(grad.dtype(), &[], 1.0 / scale);
            let unscaled =
                registry.execute1("Mul", &[grad.into(), inverse.into()], &Attributes::new())?;
            Ok((name.clone(), unscaled))
        })
        .collect()
}

/// False when any gradient holds NaN or infinity.
pub fn grads_finite(grads: &BTreeMap<String, Tensor>) -> bool {
    grads.values().all(Tensor::all_finite)
}

/// Loss scale that halves on overflow and doubles after a run of finite
/// steps.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicLossScale {
    scale: f64,
    factor: f64,
    window: usize,
    good_steps: usize,
}

impl Default for DynamicLossScale {
    fn default() -> Self {
        DynamicLossScale::new(f64::from(1_u32 << 24), 2.0, 2000)
    }
}

impl DynamicLossScale {
    pub fn new(scale: f64, factor: f64, window: usize) -> Self {
        DynamicLossScale {
            scale,
            factor,
            window: window.max(1),
            good_steps: 0,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Records one step's overflow check. Returns whether the update should
    /// be applied.
    pub fn update(&mut self, finite: bool) -> bool {
        if !finite {
            self.scale = (self.scale / self.factor).max(1.0);
            self.good_steps = 0;
            warn!("Gradient overflow, loss scale lowered to {}", self.scale);
            return false;
        }
        self.good_steps += 1;
        if self.good_steps >= self.window {
            self.scale *= self.factor;
            self.good_steps = 0;
            debug!("Loss scale raised to {}", self.scale);
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{session::SessionConfig, tensor_grad::DType};

    #[test]
    fn scaled_backward_unscales_to_plain_gradient() {
        let mut session = Session::with_config(SessionConfig::default());
        let w = session
            .parameter("w", Tensor::from_vec(vec![2], vec![1.0_f32, -2.0]).unwrap())
            .unwrap();
        let square = session.apply1("Square", &[w.into()], &Attributes::new()).unwrap();
        let loss = session
            .apply1("ReduceSum", &[square.into()], &Attributes::new())
            .unwrap();
        let scaled = scale_loss(&mut session, loss, 1024.0).unwrap();
        session.run().unwrap();
        session.backward(scaled, None).unwrap();

        let grads = session.parameter_grads().unwrap();
        assert_eq!(grads["w"].read(), vec![2048.0, -4096.0]);
        let unscaled = unscale_grads(Registry::global(), &grads, 1024.0).unwrap();
        assert_eq!(unscaled["w"].read(), vec![2.0, -4.0]);
        assert!(grads_finite(&unscaled));
    }

    #[test]
    fn half_precision_overflow_is_detected() {
        let mut grads = BTreeMap::new();
        let big = Tensor::full(DType::F16, &[2], 60000.0);
        let doubled = Registry::global()
            .execute1("Add", &[(&big).into(), (&big).into()], &Attributes::new())
            .unwrap();
        grads.insert("w".to_string(), doubled);
        assert!(!grads_finite(&grads));
    }

    #[test]
    fn dynamic_scale_backs_off_and_grows() {
        let mut scale = DynamicLossScale::new(8.0, 2.0, 2);
        assert!(!scale.update(false));
        assert_eq!(scale.scale(), 4.0);
        assert!(scale.update(true));
        assert_eq!(scale.scale(), 4.0);
        assert!(scale.update(true));
        assert_eq!(scale.scale(), 8.0);
        let mut floor = DynamicLossScale::new(1.0, 2.0, 10);
        floor.update(false);
        assert_eq!(floor.scale(), 1.0);
        assert_eq!(DynamicLossScale::default().scale(), 16_777_216.0);
    }
}
