use ndarray::Axis;
use rand::Rng;

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        operation::{
            CheckFn, DTypeClass, ForwardContext, ForwardFn, InferContext, OpKind,
            OperatorDescriptor,
        },
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

use super::{image_dims, rng_for};

fn probability(op: &str, attrs: &Attributes) -> Result<()> {
    let prob = attrs.float(op, "prob")?;
    if !(0.0..=1.0).contains(&prob) {
        return Err(OpError::attribute_type(
            op,
            "prob",
            "a probability in [0, 1]",
            prob.to_string(),
        ));
    }
    Ok(())
}

fn horizontal_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    probability("RandomHorizontalFlip", attrs)
}

fn vertical_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    probability("RandomVerticalFlip", attrs)
}

fn flip_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let image = ctx.input(0);
    image_dims(ctx.op, image)?;
    Ok(vec![image.clone()])
}

/// Mirrors the image along `axis` with probability `prob`.
fn flip(ctx: &ForwardContext, axis: usize) -> Result<Vec<Tensor>> {
    let image = ctx.input(0);
    let prob = ctx.attrs.float(ctx.op, "prob")?;
    let mut rng = rng_for(ctx.attrs.int(ctx.op, "seed")?);
    if !rng.gen_bool(prob) {
        return Ok(vec![image.clone()]);
    }
    let mut positions = image.positions()?;
    positions.invert_axis(Axis(axis));
    Ok(vec![image.gather(&positions)])
}

fn horizontal_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    flip(ctx, 1)
}

fn vertical_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    flip(ctx, 0)
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    let flips: [(&'static str, ForwardFn, CheckFn); 2] = [
        ("RandomHorizontalFlip", horizontal_forward, horizontal_check),
        ("RandomVerticalFlip", vertical_forward, vertical_check),
    ];
    for &(name, forward, check) in flips.iter() {
        registry.register(
            OperatorDescriptor::new(name, OpKind::ImageTransform, flip_infer, forward)
                .input("image", DTypeClass::Numeric)
                .attr_default("prob", AttrType::Float, 0.5)
                .attr_default("seed", AttrType::Int, -1_i64)
                .check(check),
        )?;
    }
    Ok(())
}
