//! Applies a random subset of image transforms in sequence.

use log::trace;
use rand::seq::index;

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{bind_attrs, infer_bound, same_dtype, same_shape},
        operation::{
            first_output, DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor,
        },
        operation_ir::{AttrType, Attributes, OpSpec},
        registry::Registry,
        ValueMeta,
    },
};

use super::{image_dims, rng_for};

const OP: &str = "UniformAugment";

/// Binds the attributes of one candidate transform.
fn bind_transform(registry: &Registry, spec: &OpSpec) -> Result<Attributes> {
    let desc = registry.lookup(&spec.name).map_err(|_| {
        OpError::attribute_type(OP, "operations", "registered image transforms", &spec.name)
    })?;
    if desc.kind() != OpKind::ImageTransform {
        return Err(OpError::attribute_type(
            OP,
            "operations",
            "registered image transforms",
            format!("{} ({:?})", spec.name, desc.kind()),
        ));
    }
    bind_attrs(registry, desc, &spec.attrs)
}

fn augment_check(registry: &Registry, attrs: &Attributes) -> Result<()> {
    let operations = attrs.ops(OP, "operations")?;
    for spec in operations {
        bind_transform(registry, spec)?;
    }
    let num_ops = attrs.int(OP, "num_ops")?;
    if num_ops < 1 || (num_ops as usize) > operations.len() {
        return Err(OpError::attribute_type(
            OP,
            "num_ops",
            format!("between 1 and {}", operations.len()),
            num_ops.to_string(),
        ));
    }
    Ok(())
}

fn augment_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let image = ctx.input(0);
    image_dims(ctx.op, image)?;
    for spec in ctx.attrs.ops(ctx.op, "operations")? {
        let bound = bind_transform(ctx.registry, spec)?;
        let desc = ctx.registry.lookup(&spec.name)?;
        let outputs = infer_bound(
            ctx.registry,
            desc,
            &[ValueMeta::Tensor(image.clone())],
            &bound,
        )?;
        // Any subset may run in any order, so each transform must keep the layout.
        for output in outputs.iter() {
            same_dtype(&spec.name, "image", image.dtype, output.dtype)?;
            same_shape(&spec.name, &image.shape, &output.shape)?;
        }
    }
    Ok(vec![image.clone()])
}

fn augment_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let operations = ctx.attrs.ops(ctx.op, "operations")?;
    let num_ops = ctx.attrs.int(ctx.op, "num_ops")? as usize;
    let seed = ctx.attrs.int(ctx.op, "seed")?;
    let mut rng = rng_for(seed);

    let mut image = ctx.input(0).clone();
    for (step, chosen) in index::sample(&mut rng, operations.len(), num_ops)
        .into_iter()
        .enumerate()
    {
        let spec = &operations[chosen];
        let mut attrs = spec.attrs.clone();
        let seeded = ctx
            .registry
            .lookup(&spec.name)?
            .attr_specs()
            .iter()
            .any(|attr| attr.name == "seed");
        if seed >= 0 && seeded && !attrs.contains("seed") {
            attrs.set("seed", seed + 1 + step as i64);
        }
        trace!("{} step {} applies {}", ctx.op, step, spec.name);
        image = first_output(
            &spec.name,
            ctx.registry.execute(&spec.name, &[image.into()], &attrs)?,
        )?;
    }
    Ok(vec![image])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new(OP, OpKind::ImageTransform, augment_infer, augment_forward)
            .input("image", DTypeClass::Numeric)
            .attr("operations", AttrType::Ops)
            .attr_default("num_ops", AttrType::Int, 2_i64)
            .attr_default("seed", AttrType::Int, -1_i64)
            .check(augment_check),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::tensor_grad::DType;

    use super::*;

    fn flips() -> Vec<OpSpec> {
        vec![
            OpSpec::new("RandomHorizontalFlip").with("prob", 1.0),
            OpSpec::new("RandomVerticalFlip").with("prob", 1.0),
        ]
    }

    fn augment(image: Tensor, attrs: Attributes) -> Result<Tensor> {
        Registry::global().execute1(OP, &[image.into()], &attrs)
    }

    #[test]
    fn num_ops_bounds() {
        let image = Tensor::zeros(DType::U8, &[4, 4, 3]);
        for &count in [0_i64, 3].iter() {
            let err = augment(
                image.clone(),
                Attributes::new().with("operations", flips()).with("num_ops", count),
            )
            .unwrap_err();
            assert_eq!(err.attribute(), Some("num_ops"));
        }
    }

    #[test]
    fn fractional_num_ops() {
        let err = augment(
            Tensor::zeros(DType::U8, &[4, 4, 3]),
            Attributes::new().with("operations", flips()).with("num_ops", 2.5),
        )
        .unwrap_err();
        assert_eq!(err.attribute(), Some("num_ops"));
        assert!(err.to_string().contains("an integer"));
    }

    #[test]
    fn only_image_transforms() {
        let err = augment(
            Tensor::zeros(DType::F32, &[4, 4, 3]),
            Attributes::new()
                .with("operations", vec![OpSpec::new("ReLU")])
                .with("num_ops", 1_i64),
        )
        .unwrap_err();
        assert_eq!(err.attribute(), Some("operations"));
    }

    #[test]
    fn oversized_crop_is_rejected_before_running() {
        let crop = OpSpec::new("RandomCrop").with("size", vec![224_i64, 224]);
        let err = augment(
            Tensor::zeros(DType::U8, &[32, 32, 3]),
            Attributes::new()
                .with("operations", vec![crop])
                .with("num_ops", 1_i64),
        )
        .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("Crop size"));
    }

    #[test]
    fn both_flips_rotate_half_turn() {
        let image = Tensor::from_vec(vec![2, 2, 1], vec![1_u8, 2, 3, 4]).unwrap();
        let out = augment(image, Attributes::new().with("operations", flips())).unwrap();
        assert_eq!(out.to_vec::<u8>(), Some(vec![4, 3, 2, 1]));
    }

    #[test]
    fn seeded_runs_repeat() {
        let image = Tensor::from_vec(vec![4, 4, 1], (0..16).collect::<Vec<i32>>()).unwrap();
        let operations = vec![
            OpSpec::new("RandomHorizontalFlip"),
            OpSpec::new("RandomVerticalFlip"),
            OpSpec::new("RandomCrop").with("size", 4_i64).with("padding", 1_i64),
        ];
        let attrs = Attributes::new()
            .with("operations", operations)
            .with("num_ops", 2_i64)
            .with("seed", 5_i64);
        let first = augment(image.clone(), attrs.clone()).unwrap();
        let second = augment(image, attrs).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.shape(), &[4, 4, 1]);
    }
}
