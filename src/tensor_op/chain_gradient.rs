//! Reverse-mode composition over recorded invocations.

use std::{borrow::Borrow, collections::HashMap};

use crossbeam::sync::{ShardedLock, ShardedLockReadGuard, ShardedLockWriteGuard};
use log::{debug, trace};

use crate::{
    session::SessionState,
    tensor_grad::{GradStore, Tensor, TensorID},
    utility::parallel_map,
};

use super::{
    error::{OpError, Result},
    infer::same_shape,
    invocation::{Invocation, Record},
    operation::GradContext,
    registry::Registry,
};

fn recorded(invocation: &Invocation) -> Result<&Record> {
    invocation.record().ok_or_else(|| {
        OpError::session(
            format!("differentiate {} before it has executed", invocation.name()),
            SessionState::Building,
        )
    })
}

fn poisoned() -> OpError {
    OpError::session("access gradients after a worker panicked", SessionState::Failed)
}

fn read(store: &ShardedLock<GradStore>) -> Result<ShardedLockReadGuard<'_, GradStore>> {
    store.read().map_err(|_| poisoned())
}

fn write(store: &ShardedLock<GradStore>) -> Result<ShardedLockWriteGuard<'_, GradStore>> {
    store.write().map_err(|_| poisoned())
}

/// Differentiates the first output of the last invocation, seeded with
/// `upstream`.
///
/// `invocations` must be in execution order: an invocation consuming a
/// tensor recorded later in the slice is `InvalidSessionState`.
pub fn backward<I>(registry: &Registry, invocations: &[I], upstream: &Tensor) -> Result<GradStore>
where
    I: Borrow<Invocation> + Sync,
{
    let last = invocations.last().ok_or_else(|| {
        OpError::session("differentiate an empty computation", SessionState::Building)
    })?;
    let target = recorded(last.borrow())?
        .outputs
        .first()
        .cloned()
        .ok_or_else(|| OpError::ArityError {
            op: last.borrow().name().to_string(),
            expected: "at least 1 output".to_string(),
            actual: 0,
        })?;
    backward_from(registry, invocations, &target, upstream, 1)
}

/// Differentiates `target`, any tensor recorded by `invocations`.
///
/// With `workers > 1` the invocations of each reverse level run their rules
/// concurrently; contributions are still summed in a fixed order so repeated
/// calls give identical results.
pub fn backward_from<I>(
    registry: &Registry,
    invocations: &[I],
    target: &Tensor,
    upstream: &Tensor,
    workers: usize,
) -> Result<GradStore>
where
    I: Borrow<Invocation> + Sync,
{
    check_order(invocations)?;
    same_shape("backward", target.shape(), upstream.shape())?;
    let seed = if upstream.dtype() == target.dtype() {
        upstream.clone()
    } else {
        upstream.astype(target.dtype())?
    };

    let store = ShardedLock::new(GradStore::new());
    write(&store)?.insert(target.id(), seed);

    let levels = if workers > 1 {
        reverse_levels(invocations)?
    } else {
        (0..invocations.len()).rev().map(|index| vec![index]).collect()
    };
    debug!(
        "Differentiating {} invocations in {} levels",
        invocations.len(),
        levels.len()
    );
    for level in levels {
        let gathered = parallel_map(&level, workers, |index| {
            contributions(registry, invocations[index].borrow(), &store)
        })?;
        let mut grads = write(&store)?;
        for (id, grad) in gathered.into_iter().flatten() {
            grads.accumulate(id, grad)?;
        }
    }
    store.into_inner().map_err(|_| poisoned())
}

/// Every invocation must have executed, and none may consume a tensor
/// produced after it.
fn check_order<I: Borrow<Invocation>>(invocations: &[I]) -> Result<()> {
    let mut producers: HashMap<TensorID, usize> = HashMap::new();
    for (index, invocation) in invocations.iter().enumerate() {
        for output in &recorded(invocation.borrow())?.outputs {
            producers.insert(output.id(), index);
        }
    }
    for (index, invocation) in invocations.iter().enumerate() {
        let invocation: &Invocation = invocation.borrow();
        let record = recorded(invocation)?;
        if let Some(&producer) = record
            .inputs
            .iter()
            .filter_map(|input| producers.get(&input.id()))
            .find(|&&producer| producer > index)
        {
            return Err(OpError::session(
                format!(
                    "differentiate {} (invocation {}) ahead of its input from invocation {}",
                    invocation.name(),
                    index,
                    producer
                ),
                SessionState::Executed,
            ));
        }
    }
    Ok(())
}

/// Input sensitivities of one invocation, or none when no output carries one.
fn contributions(
    registry: &Registry,
    invocation: &Invocation,
    store: &ShardedLock<GradStore>,
) -> Result<Vec<(TensorID, Tensor)>> {
    let record = recorded(invocation)?;
    let received: Vec<Option<Tensor>> = {
        let grads = read(store)?;
        record
            .outputs
            .iter()
            .map(|output| grads.get(output).cloned())
            .collect()
    };
    if received.iter().all(Option::is_none) {
        return Ok(vec![]);
    }
    let op = invocation.name();
    let rule = invocation
        .descriptor()
        .grad_rule()
        .ok_or_else(|| OpError::NoGradientDefined { op: op.to_string() })?;
    let output_grads: Vec<Tensor> = received
        .into_iter()
        .zip(&record.outputs)
        .map(|(grad, output)| grad.unwrap_or_else(|| Tensor::zeros(output.dtype(), output.shape())))
        .collect();
    trace!("Applying gradient rule of {}", op);
    let ctx = GradContext {
        op,
        registry,
        inputs: &record.inputs,
        outputs: &record.outputs,
        output_grads: &output_grads,
        attrs: invocation.attrs(),
    };
    let grads = rule(&ctx)?;
    if grads.len() != record.inputs.len() {
        return Err(OpError::mismatch(
            op,
            grads.len(),
            format!("{} input gradients", record.inputs.len()),
            format!("{} input gradients", grads.len()),
        ));
    }
    let mut contributions = Vec::with_capacity(grads.len());
    for (index, (input, grad)) in record.inputs.iter().zip(grads).enumerate() {
        let grad = match grad {
            Some(grad) if input.dtype().is_float() => grad,
            _ => continue,
        };
        if grad.shape() != input.shape() {
            return Err(OpError::mismatch(
                op,
                index,
                format!("a gradient shaped like {}", input.meta()),
                grad.meta().to_string(),
            ));
        }
        let grad = if grad.dtype() == input.dtype() {
            grad
        } else {
            grad.astype(input.dtype())?
        };
        contributions.push((input.id(), grad));
    }
    Ok(contributions)
}

/// Groups invocations so every consumer of a tensor sits in an earlier level
/// than its producer. Within a level indices descend.
fn reverse_levels<I: Borrow<Invocation>>(invocations: &[I]) -> Result<Vec<Vec<usize>>> {
    let mut producers: HashMap<TensorID, usize> = HashMap::new();
    let mut consumers: Vec<Vec<usize>> = vec![vec![]; invocations.len()];
    for (index, invocation) in invocations.iter().enumerate() {
        let record = recorded(invocation.borrow())?;
        for input in &record.inputs {
            if let Some(&producer) = producers.get(&input.id()) {
                consumers[producer].push(index);
            }
        }
        for output in &record.outputs {
            producers.insert(output.id(), index);
        }
    }
    let mut depth = vec![0_usize; invocations.len()];
    for index in (0..invocations.len()).rev() {
        depth[index] = consumers[index]
            .iter()
            .map(|&consumer| depth[consumer] + 1)
            .max()
            .unwrap_or(0);
    }
    let mut levels: Vec<Vec<usize>> = vec![vec![]; depth.iter().max().map_or(0, |d| d + 1)];
    for index in (0..invocations.len()).rev() {
        levels[depth[index]].push(index);
    }
    Ok(levels)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{tensor_grad::DType, tensor_op::operation_ir::Attributes};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn run(registry: &Registry, op: &str, inputs: &[&Tensor]) -> (Invocation, Tensor) {
        let mut invocation = Invocation::new(registry, op, &Attributes::new()).unwrap();
        let values: Vec<_> = inputs.iter().map(|&t| t.clone().into()).collect();
        let out = invocation.execute(registry, &values).unwrap().remove(0);
        (invocation, out)
    }

    #[test]
    fn multi_consumer_contributions_are_summed() {
        init();
        let registry = Registry::global();
        let t = Tensor::from_vec(vec![2], vec![1.0_f64, 2.0]).unwrap();
        let w = Tensor::from_vec(vec![2], vec![3.0_f64, 5.0]).unwrap();
        let (a, a_out) = run(registry, "Mul", &[&t, &w]);
        let (b, b_out) = run(registry, "Exp", &[&t]);
        let (c, _) = run(registry, "Add", &[&a_out, &b_out]);
        let invocations = vec![a, b, c];
        let grads = backward(registry, &invocations, &Tensor::ones(DType::F64, &[2])).unwrap();
        let expected: Vec<f64> = vec![3.0 + 1.0_f64.exp(), 5.0 + 2.0_f64.exp()];
        for (got, want) in grads.get(&t).unwrap().read().iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn repeated_backward_is_identical() {
        init();
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![3], vec![0.1_f32, 0.2, 0.3]).unwrap();
        let (a, a_out) = run(registry, "Sin", &[&x]);
        let (b, b_out) = run(registry, "Mul", &[&a_out, &x]);
        let (c, _) = run(registry, "Add", &[&b_out, &a_out]);
        let invocations = vec![a, b, c];
        let upstream = Tensor::from_vec(vec![3], vec![1.0_f32, -2.0, 0.5]).unwrap();
        let first = backward(registry, &invocations, &upstream).unwrap();
        let second = backward(registry, &invocations, &upstream).unwrap();
        assert_eq!(first.get(&x), second.get(&x));
        let target = invocations[2].record().unwrap().outputs[0].clone();
        let parallel = backward_from(registry, &invocations, &target, &upstream, 4).unwrap();
        let again = backward_from(registry, &invocations, &target, &upstream, 4).unwrap();
        assert_eq!(parallel.get(&x), again.get(&x));
    }

    #[test]
    fn forward_only_operator_without_sensitivity_is_skipped() {
        init();
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![2], vec![1.0_f32, -1.0]).unwrap();
        let (sign, _) = run(registry, "Sign", &[&x]);
        let (square, _) = run(registry, "Square", &[&x]);
        let invocations = vec![sign, square];
        let grads = backward(registry, &invocations, &Tensor::ones(DType::F32, &[2])).unwrap();
        assert_eq!(grads.get(&x).unwrap().read(), vec![2.0, -2.0]);
    }

    #[test]
    fn missing_rule_fails_only_when_reached() {
        init();
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![2], vec![1.5_f32, -1.5]).unwrap();
        let (floor, _) = run(registry, "Floor", &[&x]);
        let err = backward(registry, &[floor], &Tensor::ones(DType::F32, &[2])).unwrap_err();
        assert_eq!(
            err,
            OpError::NoGradientDefined {
                op: "Floor".to_string()
            }
        );
    }

    #[test]
    fn unexecuted_invocation_is_rejected() {
        let registry = Registry::global();
        let pending = Invocation::new(registry, "Neg", &Attributes::new()).unwrap();
        let err = backward(registry, &[pending], &Tensor::ones(DType::F32, &[1])).unwrap_err();
        assert!(matches!(err, OpError::InvalidSessionState { .. }));
    }

    #[test]
    fn out_of_order_invocations_are_rejected() {
        init();
        let registry = Registry::global();
        let x = Tensor::from_vec(vec![2], vec![0.5_f64, 1.5]).unwrap();
        let (exp, exp_out) = run(registry, "Exp", &[&x]);
        let (neg, _) = run(registry, "Neg", &[&exp_out]);
        let err = backward(registry, &[neg, exp], &Tensor::ones(DType::F64, &[2])).unwrap_err();
        assert!(matches!(
            err,
            OpError::InvalidSessionState {
                state: SessionState::Executed,
                ..
            }
        ));
    }

    #[test]
    fn upstream_must_match_target_shape() {
        let registry = Registry::global();
        let x = Tensor::ones(DType::F32, &[2, 2]);
        let (neg, _) = run(registry, "Neg", &[&x]);
        let err = backward(registry, &[neg], &Tensor::ones(DType::F32, &[4])).unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
    }

    #[test]
    fn reverse_levels_group_independent_branches() {
        let registry = Registry::global();
        let x = Tensor::ones(DType::F32, &[2]);
        let (a, a_out) = run(registry, "Exp", &[&x]);
        let (b, b_out) = run(registry, "Sin", &[&x]);
        let (c, _) = run(registry, "Add", &[&a_out, &b_out]);
        let levels = reverse_levels(&[a, b, c]).unwrap();
        assert_eq!(levels, vec![vec![2], vec![1, 0]]);
    }
}
