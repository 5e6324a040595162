use ndarray::{s, Array3, Ix3};
use rand::Rng;

use crate::{
    tensor_grad::{Tensor, TensorData, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        kernel::layout_error,
        operation::{DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

use super::{image_dims, rng_for};

const OP: &str = "RandomCrop";

/// Output height and width; a single value crops a square.
fn crop_size(attrs: &Attributes) -> Result<(usize, usize)> {
    let size = attrs.ints(OP, "size")?;
    match size[..] {
        [side] if side > 0 => Ok((side as usize, side as usize)),
        [height, width] if height > 0 && width > 0 => Ok((height as usize, width as usize)),
        _ => Err(OpError::attribute_type(
            OP,
            "size",
            "one or two positive integers",
            format!("{:?}", size),
        )),
    }
}

/// Zero padding as (left, top, right, bottom). One value pads every side, two
/// values pad left/right and top/bottom.
fn padding(attrs: &Attributes) -> Result<(usize, usize, usize, usize)> {
    let padding = attrs.ints(OP, "padding")?;
    let invalid = || {
        OpError::attribute_type(
            OP,
            "padding",
            "zero, one, two or four non-negative integers",
            format!("{:?}", padding),
        )
    };
    if padding.iter().any(|&pad| pad < 0) {
        return Err(invalid());
    }
    let pad: Vec<usize> = padding.iter().map(|&pad| pad as usize).collect();
    match pad[..] {
        [] => Ok((0, 0, 0, 0)),
        [all] => Ok((all, all, all, all)),
        [horizontal, vertical] => Ok((horizontal, vertical, horizontal, vertical)),
        [left, top, right, bottom] => Ok((left, top, right, bottom)),
        _ => Err(invalid()),
    }
}

fn crop_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    crop_size(attrs)?;
    padding(attrs)?;
    Ok(())
}

fn crop_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let image = ctx.input(0);
    let (height, width, channels) = image_dims(ctx.op, image)?;
    let (crop_h, crop_w) = crop_size(ctx.attrs)?;
    let (left, top, right, bottom) = padding(ctx.attrs)?;
    let (padded_h, padded_w) = (height + top + bottom, width + left + right);
    if crop_h > padded_h || crop_w > padded_w {
        let (dim, expected, actual) = if crop_h > padded_h {
            (0, padded_h, crop_h)
        } else {
            (1, padded_w, crop_w)
        };
        return Err(OpError::shape(
            ctx.op,
            Some(dim),
            expected,
            actual,
            format!(
                "Crop size {:?} is larger than image size {:?}",
                [crop_h, crop_w],
                [padded_h, padded_w]
            ),
        ));
    }
    Ok(vec![image.with_shape(vec![crop_h, crop_w, channels])])
}

fn crop_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let image = ctx.input(0);
    let (crop_h, crop_w) = crop_size(ctx.attrs)?;
    let (left, top, right, bottom) = padding(ctx.attrs)?;
    let positions = image
        .positions()?
        .into_dimensionality::<Ix3>()
        .map_err(|err| layout_error(ctx.op, err))?;
    let (height, width, channels) = positions.dim();

    // Padding points one past the image, at an appended zero.
    let sentinel = image.numel();
    let mut padded = Array3::from_elem(
        (height + top + bottom, width + left + right, channels),
        sentinel,
    );
    padded
        .slice_mut(s![top..top + height, left..left + width, ..])
        .assign(&positions);

    let mut rng = rng_for(ctx.attrs.int(ctx.op, "seed")?);
    let row = rng.gen_range(0..=padded.dim().0 - crop_h);
    let col = rng.gen_range(0..=padded.dim().1 - crop_w);
    let window = padded
        .slice(s![row..row + crop_h, col..col + crop_w, ..])
        .to_owned()
        .into_dyn();

    let mut data = image.data().clone();
    data.extend(&TensorData::from_f64(image.dtype(), &[0.0]));
    let source = Tensor::from_parts(image.dtype(), vec![sentinel + 1], data);
    Ok(vec![source.gather(&window)])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new(OP, OpKind::ImageTransform, crop_infer, crop_forward)
            .input("image", DTypeClass::Numeric)
            .attr("size", AttrType::Ints)
            .attr_default("padding", AttrType::Ints, Vec::<i64>::new())
            .attr_default("seed", AttrType::Int, -1_i64)
            .check(crop_check),
    )?;
    Ok(())
}
