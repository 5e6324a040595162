use std::collections::HashMap;

use log::trace;

use crate::tensor_op::error::{OpError, Result};

use super::tensor::{Tensor, TensorID};

/// Sensitivities keyed by tensor identity.
///
/// A tensor consumed by several invocations receives one contribution per
/// consumer; `accumulate` sums them.
#[derive(Debug, Clone, Default)]
pub struct GradStore {
    grads: HashMap<TensorID, Tensor>,
}

impl GradStore {
    pub fn new() -> Self {
        GradStore::default()
    }

    pub fn get(&self, tensor: &Tensor) -> Option<&Tensor> {
        self.grads.get(&tensor.id())
    }

    pub fn get_by_id(&self, id: &TensorID) -> Option<&Tensor> {
        self.grads.get(id)
    }

    pub fn contains(&self, id: &TensorID) -> bool {
        self.grads.contains_key(id)
    }

    pub fn insert(&mut self, id: TensorID, grad: Tensor) -> Option<Tensor> {
        self.grads.insert(id, grad)
    }

    pub fn remove(&mut self, id: &TensorID) -> Option<Tensor> {
        self.grads.remove(id)
    }

    /// Adds `grad` to whatever is already stored for `id`.
    pub fn accumulate(&mut self, id: TensorID, grad: Tensor) -> Result<()> {
        let summed = match self.grads.get(&id) {
            None => grad,
            Some(existing) => {
                if existing.shape() != grad.shape() {
                    return Err(OpError::shape(
                        "GradStore",
                        None,
                        existing.numel(),
                        grad.numel(),
                        format!(
                            "cannot accumulate a gradient of shape {:?} into one of shape {:?}",
                            grad.shape(),
                            existing.shape()
                        ),
                    ));
                }
                trace!("Accumulating second contribution for tensor {}", id);
                let values: Vec<f64> = existing
                    .read()
                    .into_iter()
                    .zip(grad.read())
                    .map(|(lhs, rhs)| lhs + rhs)
                    .collect();
                Tensor::from_f64(existing.dtype(), existing.shape().to_vec(), &values)?
            }
        };
        self.grads.insert(id, summed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TensorID, &Tensor)> {
        self.grads.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor_grad::DType;

    #[test]
    fn accumulate_sums_contributions() {
        let x = Tensor::zeros(DType::F32, &[2]);
        let mut store = GradStore::new();
        store
            .accumulate(x.id(), Tensor::from_vec(vec![2], vec![1_f32, 2.]).unwrap())
            .unwrap();
        store
            .accumulate(x.id(), Tensor::from_vec(vec![2], vec![0.5_f32, -1.]).unwrap())
            .unwrap();
        assert_eq!(store.get(&x).unwrap().read(), vec![1.5, 1.0]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn accumulate_rejects_shape_change() {
        let x = Tensor::zeros(DType::F32, &[2]);
        let mut store = GradStore::new();
        store.accumulate(x.id(), Tensor::ones(DType::F32, &[2])).unwrap();
        assert!(store
            .accumulate(x.id(), Tensor::ones(DType::F32, &[3]))
            .is_err());
    }
}
