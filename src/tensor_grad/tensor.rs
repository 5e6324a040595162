use std::{fmt, sync::Arc};

use log::trace;
use rand::{distributions::Uniform, Rng};
use uuid::Uuid;

use crate::tensor_op::error::{OpError, Result};

use super::{
    dtype::{DType, Element, TensorData},
    tensor_ir::{element_count, TensorMeta},
};

pub type TensorID = Uuid;

/// A typed, immutable-shape multi-dimensional array.
///
/// Cloning is cheap: the element buffer is shared. Every constructed tensor gets
/// a fresh identity which gradient accumulation is keyed on; the identity is not
/// part of equality.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub(crate) tensor_id: TensorID,
    dtype: DType,
    dims: Vec<usize>,
    data: Arc<TensorData>,
    trainable: bool,
}

impl Tensor {
    /// Validated construction from a raw buffer.
    pub fn create(dtype: DType, shape: Vec<usize>, data: TensorData) -> Result<Tensor> {
        if data.dtype() != dtype {
            return Err(OpError::attribute_type(
                "Tensor",
                "data",
                dtype.name(),
                data.dtype().name(),
            ));
        }
        let expected = element_count("Tensor", &shape)?;
        if data.len() != expected {
            return Err(OpError::shape(
                "Tensor",
                None,
                expected,
                data.len(),
                format!(
                    "data has {} elements but shape {:?} requires {}",
                    data.len(),
                    shape,
                    expected
                ),
            ));
        }
        Ok(Tensor::from_parts(dtype, shape, data))
    }

    /// Construction from parts already known to agree.
    pub(crate) fn from_parts(dtype: DType, dims: Vec<usize>, data: TensorData) -> Tensor {
        debug_assert_eq!(data.len(), dims.iter().product::<usize>());
        Tensor {
            tensor_id: Uuid::new_v4(),
            dtype,
            dims,
            data: Arc::new(data),
            trainable: false,
        }
    }

    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Tensor> {
        Tensor::create(T::DTYPE, shape, T::into_data(values))
    }

    pub fn scalar<T: Element>(value: T) -> Tensor {
        Tensor::from_parts(T::DTYPE, vec![], T::into_data(vec![value]))
    }

    pub fn from_f64(dtype: DType, shape: Vec<usize>, values: &[f64]) -> Result<Tensor> {
        Tensor::create(dtype, shape, TensorData::from_f64(dtype, values))
    }

    pub fn full(dtype: DType, shape: &[usize], value: f64) -> Tensor {
        let total: usize = shape.iter().product();
        Tensor::from_parts(
            dtype,
            shape.to_vec(),
            TensorData::from_f64(dtype, &vec![value; total]),
        )
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Tensor {
        Tensor::full(dtype, shape, 0.0)
    }

    pub fn ones(dtype: DType, shape: &[usize]) -> Tensor {
        Tensor::full(dtype, shape, 1.0)
    }

    /// Samples every element uniformly from `[low, high)`.
    pub fn rand_uniform<R: Rng>(
        dtype: DType,
        shape: &[usize],
        low: f64,
        high: f64,
        rng: &mut R,
    ) -> Tensor {
        if high <= low {
            return Tensor::full(dtype, shape, low);
        }
        let total: usize = shape.iter().product();
        let values: Vec<f64> = rng.sample_iter(Uniform::new(low, high)).take(total).collect();
        Tensor::from_parts(dtype, shape.to_vec(), TensorData::from_f64(dtype, &values))
    }

    pub fn id(&self) -> TensorID {
        self.tensor_id
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn meta(&self) -> TensorMeta {
        TensorMeta::new(self.dims.clone(), self.dtype)
    }

    /// Marks the tensor as a parameter rather than an ordinary value.
    pub fn trainable(mut self) -> Self {
        self.trainable = true;
        self
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Elements widened to `f64` in row-major order.
    pub fn read(&self) -> Vec<f64> {
        self.data.to_f64_vec()
    }

    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        T::slice(&self.data).map(|values| values.to_vec())
    }

    /// Same elements under a new shape of equal element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        let requested = element_count("Reshape", shape)?;
        if requested != self.numel() {
            return Err(OpError::shape(
                "Reshape",
                None,
                self.numel(),
                requested,
                format!(
                    "cannot reshape {:?} ({} elements) into {:?} ({} elements)",
                    self.dims,
                    self.numel(),
                    shape,
                    requested
                ),
            ));
        }
        Ok(Tensor {
            tensor_id: Uuid::new_v4(),
            dtype: self.dtype,
            dims: shape.to_vec(),
            data: Arc::clone(&self.data),
            trainable: self.trainable,
        })
    }

    /// Elementwise conversion to `dtype`. Float to integer is lossy
    /// (saturating, NaN becomes zero); float to bool is refused.
    pub fn astype(&self, dtype: DType) -> Result<Tensor> {
        if !self.dtype.can_cast_to(dtype) {
            return Err(OpError::UnsupportedCast {
                from: self.dtype,
                to: dtype,
            });
        }
        trace!("Casting tensor {} from {} to {}", self.tensor_id, self.dtype, dtype);
        Ok(Tensor::from_parts(
            dtype,
            self.dims.clone(),
            self.data.convert(dtype),
        ))
    }

    /// The same value under a new identity.
    pub(crate) fn detached(&self) -> Tensor {
        Tensor {
            tensor_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// True when every float element is finite. Non-float tensors always are.
    pub fn all_finite(&self) -> bool {
        !self.dtype.is_float() || self.read().iter().all(|value| value.is_finite())
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.dims == other.dims && self.data == other.data
    }
}

fn padding(depth: usize) -> String {
    std::iter::repeat(" ").take(depth).collect()
}

impl Tensor {
    fn fmt_nested(
        &self,
        f: &mut fmt::Formatter<'_>,
        depth: usize,
        offset: usize,
    ) -> fmt::Result {
        let stride: usize = self.dims[depth + 1..].iter().product();
        if depth + 1 == self.dims.len() {
            let row: Vec<String> = (0..self.dims[depth])
                .map(|i| self.data.format_element(offset + i))
                .collect();
            return write!(f, "{}[{}]", padding(depth), row.join(", "));
        }
        writeln!(f, "{}[", padding(depth))?;
        for i in 0..self.dims[depth] {
            self.fmt_nested(f, depth + 1, offset + i * stride)?;
            if i + 1 < self.dims[depth] {
                write!(f, ",")?;
            }
            writeln!(f)?;
        }
        write!(f, "{}]", padding(depth))
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return write!(f, "{}", self.data.format_element(0));
        }
        self.fmt_nested(f, 0, 0)
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn create_checks_element_count() {
        init();
        let err = Tensor::create(DType::F32, vec![2, 3], TensorData::F32(vec![0.0; 5]))
            .expect_err("five elements cannot fill a 2x3 tensor");
        assert!(matches!(
            err,
            OpError::ShapeMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn create_rejects_unaddressable_shape() {
        init();
        let err = Tensor::create(DType::F32, vec![usize::MAX, 2], TensorData::F32(vec![]))
            .unwrap_err();
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
        let x = Tensor::ones(DType::F32, &[4]);
        assert!(matches!(
            x.reshape(&[1 << 33, 1 << 33, 1 << 33]),
            Err(OpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn create_checks_buffer_type() {
        init();
        let err = Tensor::create(DType::F32, vec![2], TensorData::I32(vec![1, 2])).unwrap_err();
        assert_eq!(err.attribute(), Some("data"));
    }

    #[test]
    fn reshape_round_trip_restores_tensor() {
        init();
        let x = Tensor::from_vec(vec![2, 3], vec![1_f32, 2., 3., 4., 5., 6.]).unwrap();
        let y = x.reshape(&[3, 2]).unwrap().reshape(&[2, 3]).unwrap();
        assert_eq!(x, y);
        assert_ne!(x.id(), y.id());
        assert!(x.reshape(&[4]).is_err());
    }

    #[test]
    fn rank_zero_tensor() {
        init();
        let x = Tensor::scalar(3.5_f64);
        assert_eq!(x.rank(), 0);
        assert_eq!(x.numel(), 1);
        assert_eq!(x.read(), vec![3.5]);
        assert_eq!(format!("{}", x), "3.5");
    }

    #[test]
    fn astype_rules() {
        init();
        let x = Tensor::from_vec(vec![3], vec![-1.5_f32, 0.2, 300.0]).unwrap();
        let y = x.astype(DType::U8).unwrap();
        assert_eq!(y.to_vec::<u8>(), Some(vec![0, 0, 255]));
        assert!(matches!(
            x.astype(DType::Bool),
            Err(OpError::UnsupportedCast {
                from: DType::F32,
                to: DType::Bool
            })
        ));
        let flags = Tensor::from_vec(vec![2], vec![true, false]).unwrap();
        assert_eq!(flags.astype(DType::F64).unwrap().read(), vec![1.0, 0.0]);
    }

    #[test]
    fn equality_ignores_identity() {
        let a = Tensor::ones(DType::F64, &[2, 2]);
        let b = Tensor::ones(DType::F64, &[2, 2]);
        assert_eq!(a, b);
        assert_ne!(a, Tensor::ones(DType::F32, &[2, 2]));
        assert_ne!(a, Tensor::ones(DType::F64, &[4]));
    }

    #[test]
    fn seeded_random_initialisation() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Tensor::rand_uniform(DType::F32, &[4, 4], -1.0, 1.0, &mut rng);
        let mut rng = StdRng::seed_from_u64(7);
        let b = Tensor::rand_uniform(DType::F32, &[4, 4], -1.0, 1.0, &mut rng);
        assert_eq!(a, b);
        assert!(a.read().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn display_nests_brackets() {
        let x = Tensor::from_vec(vec![2, 2], vec![1_i32, 2, 3, 4]).unwrap();
        assert_eq!(format!("{}", x), "[\n [1, 2],\n [3, 4]\n]");
    }
}
