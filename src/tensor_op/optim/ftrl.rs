//! Sparse FTRL-proximal update over the rows named by `indices`.

use crate::{
    tensor_grad::{Tensor, TensorMeta},
    tensor_op::{
        error::{OpError, Result},
        infer::{same_dtype, same_shape},
        operation::{DTypeClass, ForwardContext, InferContext, OpKind, OperatorDescriptor},
        operation_ir::{AttrType, Attributes},
        registry::Registry,
    },
};

use super::require;

struct Hyper {
    lr: f64,
    l1: f64,
    l2: f64,
    lr_power: f64,
}

impl Hyper {
    fn bind(op: &str, attrs: &Attributes) -> Result<Hyper> {
        Ok(Hyper {
            lr: require(op, attrs, "lr", "a positive float", |lr| lr > 0.0)?,
            l1: require(op, attrs, "l1", "a non-negative float", |l1| l1 >= 0.0)?,
            l2: require(op, attrs, "l2", "a non-negative float", |l2| l2 >= 0.0)?,
            lr_power: require(op, attrs, "lr_power", "a non-positive float", |p| p <= 0.0)?,
        })
    }

    /// `accum^(-lr_power)`, with the common `-0.5` case as a square root.
    fn scaled(&self, accum: f64) -> f64 {
        if self.lr_power == -0.5 {
            accum.sqrt()
        } else {
            accum.powf(-self.lr_power)
        }
    }

    /// Updates one element in place.
    fn apply(&self, var: &mut f64, accum: &mut f64, linear: &mut f64, grad: f64) {
        let accum_new = *accum + grad * grad;
        *linear += grad - (self.scaled(accum_new) - self.scaled(*accum)) / self.lr * *var;
        let quadratic = self.scaled(accum_new) / self.lr + 2.0 * self.l2;
        *var = if linear.abs() > self.l1 {
            (linear.signum() * self.l1 - *linear) / quadratic
        } else {
            0.0
        };
        *accum = accum_new;
    }
}

fn ftrl_check(_registry: &Registry, attrs: &Attributes) -> Result<()> {
    Hyper::bind("SparseApplyFtrl", attrs).map(|_| ())
}

fn ftrl_infer(ctx: &InferContext) -> Result<Vec<TensorMeta>> {
    let (var, accum, linear) = (ctx.input(0), ctx.input(1), ctx.input(2));
    let (grad, indices) = (ctx.input(3), ctx.input(4));
    for (name, other) in [("accum", accum), ("linear", linear), ("grad", grad)].iter() {
        same_dtype(ctx.op, name, var.dtype, other.dtype)?;
    }
    same_shape(ctx.op, &var.shape, &accum.shape)?;
    same_shape(ctx.op, &var.shape, &linear.shape)?;
    if var.rank() == 0 {
        return Err(OpError::shape(ctx.op, None, 1, 0, "var must be at least 1-D"));
    }
    if indices.rank() != 1 {
        return Err(OpError::shape(
            ctx.op,
            None,
            1,
            indices.rank(),
            format!("indices must be a 1-D vector, got {:?}", indices.shape),
        ));
    }
    if grad.rank() != var.rank() {
        return Err(OpError::shape(
            ctx.op,
            None,
            var.rank(),
            grad.rank(),
            format!("grad {:?} must have the rank of var {:?}", grad.shape, var.shape),
        ));
    }
    if let Some(dim) = (1..var.rank()).find(|&dim| grad.shape[dim] != var.shape[dim]) {
        return Err(OpError::shape(
            ctx.op,
            Some(dim),
            var.shape[dim],
            grad.shape[dim],
            format!("grad {:?} does not match var {:?} at dimension {}", grad.shape, var.shape, dim),
        ));
    }
    if grad.shape[0] != indices.shape[0] {
        return Err(OpError::shape(
            ctx.op,
            Some(0),
            indices.shape[0],
            grad.shape[0],
            format!(
                "grad has {} rows but there are {} indices",
                grad.shape[0], indices.shape[0]
            ),
        ));
    }
    Ok(vec![var.clone(), accum.clone(), linear.clone()])
}

fn ftrl_forward(ctx: &ForwardContext) -> Result<Vec<Tensor>> {
    let hyper = Hyper::bind(ctx.op, ctx.attrs)?;
    let mut var = ctx.input(0).read();
    let mut accum = ctx.input(1).read();
    let mut linear = ctx.input(2).read();
    let grad = ctx.input(3).read();
    let rows = ctx.input(0).shape()[0];
    let width: usize = ctx.input(0).shape()[1..].iter().product();
    for (row, &index) in ctx.input(4).data().to_i64_vec().iter().enumerate() {
        if index < 0 || (index as usize) >= rows {
            return Err(OpError::attribute_type(
                ctx.op,
                "indices",
                format!("row indices in [0, {})", rows),
                index.to_string(),
            ));
        }
        let target = index as usize * width;
        for offset in 0..width {
            let at = target + offset;
            hyper.apply(
                &mut var[at],
                &mut accum[at],
                &mut linear[at],
                grad[row * width + offset],
            );
        }
    }
    let (dtype, shape) = (ctx.output_dtype(0), ctx.input(0).shape().to_vec());
    Ok(vec![
        Tensor::from_f64(dtype, shape.clone(), &var)?,
        Tensor::from_f64(dtype, shape.clone(), &accum)?,
        Tensor::from_f64(dtype, shape, &linear)?,
    ])
}

pub(crate) fn register(registry: &mut Registry) -> Result<()> {
    registry.register(
        OperatorDescriptor::new("SparseApplyFtrl", OpKind::Optimizer, ftrl_infer, ftrl_forward)
            .input("var", DTypeClass::Float)
            .input("accum", DTypeClass::Float)
            .input("linear", DTypeClass::Float)
            .input("grad", DTypeClass::Float)
            .input("indices", DTypeClass::Int)
            .attr("lr", AttrType::Float)
            .attr("l1", AttrType::Float)
            .attr("l2", AttrType::Float)
            .attr("lr_power", AttrType::Float)
            .outputs(3)
            .check(ftrl_check),
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{tensor_grad::DType, tensor_op::Value};

    use super::*;

    fn attrs() -> Attributes {
        Attributes::new()
            .with("lr", 0.001)
            .with("l1", 0.0)
            .with("l2", 0.0)
            .with("lr_power", -0.5)
    }

    fn inputs(indices: Vec<i32>) -> Vec<Value> {
        let state = |value: f64| Tensor::full(DType::F32, &[3, 2], value);
        let rows = indices.len();
        vec![
            state(1.0).into(),
            state(1.0).into(),
            state(1.0).into(),
            Tensor::full(DType::F32, &[rows, 2], 0.5).into(),
            Tensor::from_vec(vec![rows], indices).unwrap().into(),
        ]
    }

    #[test]
    fn updates_only_indexed_rows() {
        let outputs = Registry::global()
            .execute("SparseApplyFtrl", &inputs(vec![2]), &attrs())
            .unwrap();
        assert_eq!(outputs.len(), 3);
        let (var, accum) = (outputs[0].read(), outputs[1].read());
        assert_eq!(var[..4], [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(accum[..4], [1.0, 1.0, 1.0, 1.0]);
        assert!((accum[4] - 1.25).abs() < 1e-6);

        // linear = 1 + 0.5 - (sqrt(1.25) - 1) / 0.001; var = -linear / (sqrt(1.25) / 0.001)
        let linear = 1.5 - (1.25_f64.sqrt() - 1.0) / 0.001;
        let expected = -linear / (1.25_f64.sqrt() / 0.001);
        assert!((outputs[2].read()[5] - linear).abs() < 1e-2);
        assert!((var[5] - expected).abs() < 1e-4);
    }

    #[test]
    fn index_out_of_range() {
        let err = Registry::global()
            .execute("SparseApplyFtrl", &inputs(vec![3]), &attrs())
            .unwrap_err();
        assert_eq!(err.attribute(), Some("indices"));
    }

    #[test]
    fn hyper_parameters_are_checked() {
        let registry = Registry::global();
        for (name, value) in [("lr", 0.0), ("l1", -1.0), ("l2", -0.1), ("lr_power", 0.5)].iter() {
            let err = registry
                .execute("SparseApplyFtrl", &inputs(vec![0]), &attrs().with(name, *value))
                .unwrap_err();
            assert_eq!(err.attribute(), Some(*name));
        }
    }

    #[test]
    fn grad_rows_must_match_indices() {
        let mut values = inputs(vec![0, 1]);
        values[3] = Tensor::full(DType::F32, &[1, 2], 0.5).into();
        let err = Registry::global()
            .execute("SparseApplyFtrl", &values, &attrs())
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { dim: Some(0), .. }));
    }
}
