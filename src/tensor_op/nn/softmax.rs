//! Softmax family. Reductions run along one axis, `-1` by default.

use ndarray::{ArrayD, Axis};

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{normalize_axis, same_dtype, same_shape, unary_same},
        operation::{DTypeClass, ForwardContext, GradContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

fn softmax_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    normalize_axis(ctx.op, "axis", ctx.attrs.int(ctx.op, "axis")?, ctx.input(0).rank(), false)?;
    unary_same(ctx)
}

/// `x - max(x)` along `axis`, kept broadcastable.
fn shifted(x: &ArrayD<f64>, axis: Axis) -> ArrayD<f64> {
    let peak = x
        .fold_axis(axis, f64::NEG_INFINITY, |&peak, &value| peak.max(value))
        .insert_axis(axis);
    x - &peak
}

/// `log(sum(exp(shifted)))` along `axis`, kept broadcastable.
fn log_partition(shifted: &ArrayD<f64>, axis: Axis) -> ArrayD<f64> {
    shifted
        .mapv(f64::exp)
        .sum_axis(axis)
        .mapv(f64::ln)
        .insert_axis(axis)
}

fn log_softmax_array(x: &ArrayD<f64>, axis: Axis) -> ArrayD<f64> {
    let shifted = shifted(x, axis);
    let partition = log_partition(&shifted, axis);
    shifted - &partition
}

fn softmax_axis(ctx_op: &str, attrs: &Attributes, rank: usize) -> Result<Axis> {
    Ok(Axis(normalize_axis(ctx_op, "axis", attrs.int(ctx_op, "axis")?, rank, false)?))
}

fn softmax_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let axis = softmax_axis(ctx.op, ctx.attrs, x.rank())?;
    let probabilities = log_softmax_array(&x.to_array()?, axis).mapv(f64::exp);
    Ok(vec![Tensor::from_array(ctx.output_dtype(0), &probabilities)])
}

fn log_softmax_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let x = ctx.input(0);
    let axis = softmax_axis(ctx.op, ctx.attrs, x.rank())?;
    let out = log_softmax_array(&x.to_array()?, axis);
    Ok(vec![Tensor::from_array(ctx.output_dtype(0), &out)])
}

fn sum_along(ctx: &GradContext, tensor: &Tensor) -> Result<Tensor> {
    ctx.call1(
        "ReduceSum",
        &[tensor.into()],
        Attributes::new()
            .with("axis", ctx.attrs.int(ctx.op, "axis")?)
            .with("keep_dims", true),
    )
}

// dx = y * (dy - sum(dy * y))
fn softmax_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (out, dout) = (ctx.output(0), ctx.dout(0));
    let weighted = ctx.call1("Mul", &[dout.into(), out.into()], Attributes::new())?;
    let total = sum_along(ctx, &weighted)?;
    let centred = ctx.call1("Sub", &[dout.into(), total.into()], Attributes::new())?;
    let dx = ctx.call1("Mul", &[out.into(), centred.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

// dx = dy - exp(y) * sum(dy)
fn log_softmax_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let (out, dout) = (ctx.output(0), ctx.dout(0));
    let total = sum_along(ctx, dout)?;
    let probabilities = ctx.call1("Exp", &[out.into()], Attributes::new())?;
    let spread = ctx.call1("Mul", &[probabilities.into(), total.into()], Attributes::new())?;
    let dx = ctx.call1("Sub", &[dout.into(), spread.into()], Attributes::new())?;
    Ok(vec![Some(dx)])
}

/// Logits and one-hot (or soft) labels, both `[N, C]`. Returns the per-row
/// loss `[N]` and the gradient of the loss with respect to the logits.
fn cross_entropy_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (logits, labels) = (ctx.input(0), ctx.input(1));
    same_dtype(ctx.op, "labels", logits.dtype, labels.dtype)?;
    if logits.rank() != 2 {
        return Err(OpError::shape(
            ctx.op,
            None,
            2,
            logits.rank(),
            format!("logits must be [batch, classes], got {:?}", logits.shape),
        ));
    }
    same_shape(ctx.op, &logits.shape, &labels.shape)?;
    Ok(vec![
        logits.with_shape(vec![logits.shape[0]]),
        logits.clone(),
    ])
}

fn cross_entropy_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let (logits, labels) = (ctx.input(0).to_array()?, ctx.input(1).to_array()?);
    let dtype = ctx.output_dtype(0);
    let log_probabilities = log_softmax_array(&logits, Axis(1));
    let loss = (&labels * &log_probabilities).sum_axis(Axis(1)).mapv(|total| -total);
    let backprop = log_probabilities.mapv(f64::exp) - &labels;
    Ok(vec![
        Tensor::from_array(dtype, &loss),
        Tensor::from_array(dtype, &backprop),
    ])
}

// The labels receive no sensitivity; neither does the backprop output.
fn cross_entropy_grad(ctx: &GradContext) -> Result<Vec<Option<Tensor>>> {
    let batch = ctx.input(0).shape()[0];
    let column = ctx.call1(
        "Reshape",
        &[ctx.dout(0).into()],
        Attributes::new().with("shape", vec![batch as i64, 1]),
    )?;
    let dlogits = ctx.call1("Mul", &[ctx.output(1).into(), column.into()], Attributes::new())?;
    Ok(vec![Some(dlogits), None])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("Softmax", OpKind::Nn, softmax_infer, softmax_forward)
            .input("x", DTypeClass::Float)
            .attr_default("axis", AttrType::Int, -1_i64)
            .grad(softmax_grad),
    )?;
    registry.register(
        OperatorDescriptor::new("LogSoftmax", OpKind::Nn, softmax_infer, log_softmax_forward)
            .input("x", DTypeClass::Float)
            .attr_default("axis", AttrType::Int, -1_i64)
            .grad(log_softmax_grad),
    )?;
    registry.register(
        OperatorDescriptor::new(
            "SoftmaxCrossEntropyWithLogits",
            OpKind::Nn,
            cross_entropy_infer,
            cross_entropy_forward,
        )
        .input("logits", DTypeClass::Float)
        .input("labels", DTypeClass::Float)
        .outputs(2)
        .grad(cross_entropy_grad),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::tensor_grad::DType;

    use super::*;

    fn close(lhs: &[f64], rhs: &[f64]) -> bool {
        lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| (a - b).abs() < 1e-9)
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = Tensor::from_vec(vec![2, 3], vec![1.0_f64, 2.0, 3.0, 1000.0, 1000.0, 1000.0]).unwrap();
        let out = Registry::global()
            .execute1("Softmax", &[x.into()], &Attributes::new())
            .unwrap()
            .read();
        let first: f64 = out[..3].iter().sum();
        assert!((first - 1.0).abs() < 1e-12);
        assert!(close(&out[3..], &[1.0 / 3.0; 3]));
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn log_softmax_matches_log_of_softmax() {
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![3, 2], vec![0.5_f64, -1.0, 2.0, 0.0, 1.0, 1.0]).unwrap();
        let attrs = Attributes::new().with("axis", 0_i64);
        let soft = registry.execute1("Softmax", &[x.clone().into()], &attrs).unwrap();
        let log = registry.execute1("LogSoftmax", &[x.into()], &attrs).unwrap();
        let expected: Vec<f64> = soft.read().iter().map(|p| p.ln()).collect();
        assert!(close(&log.read(), &expected));
    }

    #[test]
    fn cross_entropy_with_one_hot_labels() {
        let logits = Tensor::from_vec(vec![1, 2], vec![0.0_f64, 0.0]).unwrap();
        let labels = Tensor::from_vec(vec![1, 2], vec![1.0_f64, 0.0]).unwrap();
        let outputs = Registry::global()
            .execute("SoftmaxCrossEntropyWithLogits", &[logits.into(), labels.into()], &Attributes::new())
            .unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(close(&outputs[0].read(), &[2.0_f64.ln()]));
        assert!(close(&outputs[1].read(), &[-0.5, 0.5]));
    }

    #[test]
    fn cross_entropy_needs_matching_labels() {
        let logits = Tensor::zeros(DType::F32, &[2, 3]);
        let labels = Tensor::zeros(DType::F32, &[2, 4]);
        let err = Registry::global()
            .execute("SoftmaxCrossEntropyWithLogits", &[logits.into(), labels.into()], &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { dim: Some(1), .. }));
    }
}
