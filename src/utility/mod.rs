use env_logger::Env;
use log::debug;

use crate::{
    session::SessionState,
    tensor_grad::{DType, Tensor},
    tensor_op::error::{OpError, Result},
};

/// Initialises `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
}

/// Parameter initialisation drawn uniformly from `[-scale, scale)`.
pub fn random_initialize(dtype: DType, dims: &[usize], scale: f64) -> Tensor {
    let mut rng = rand::thread_rng();
    Tensor::rand_uniform(dtype, dims, -scale, scale, &mut rng).trainable()
}

fn panicked() -> OpError {
    OpError::session("collect results from a worker that panicked", SessionState::Failed)
}

/// Maps `f` over `items` on up to `workers` scoped threads.
///
/// Results come back in the order of `items`; the first error wins.
pub(crate) fn parallel_map<A, T, F>(items: &[A], workers: usize, f: F) -> Result<Vec<T>>
where
    A: Copy + Sync,
    T: Send,
    F: Fn(A) -> Result<T> + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        return items.iter().map(|&item| f(item)).collect();
    }
    let chunk = (items.len() + workers - 1) / workers;
    debug!(
        "Spreading {} items over {} workers",
        items.len(),
        (items.len() + chunk - 1) / chunk
    );
    let f = &f;
    let joined = crossbeam::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(chunk)
            .map(|part| {
                scope.spawn(move |_| part.iter().map(|&item| f(item)).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| panicked())?;

    let mut results = Vec::with_capacity(items.len());
    for part in joined {
        results.extend(part.map_err(|_| panicked())?);
    }
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn random_initialize_stays_in_range() {
        init();
        let weights = random_initialize(DType::F64, &[4, 3], 0.5);
        assert!(weights.is_trainable());
        assert!(weights.read().iter().all(|w| (-0.5..0.5).contains(w)));
    }

    #[test]
    fn parallel_map_keeps_order() {
        init();
        let items: Vec<usize> = (0..17).collect();
        let squares = parallel_map(&items, 4, |i| Ok(i * i)).unwrap();
        assert_eq!(squares, items.iter().map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_map_reports_errors() {
        let items = [1_i64, 2, -3, 4];
        let err = parallel_map(&items, 2, |i| {
            if i < 0 {
                Err(OpError::attribute_type("test", "item", "positive", i.to_string()))
            } else {
                Ok(i)
            }
        })
        .unwrap_err();
        assert_eq!(err.attribute(), Some("item"));
    }
}
