use std::fmt;

use half::f16;
use num_traits::{NumCast, ToPrimitive};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
}

impl DType {
    pub const ALL: [DType; 12] = [
        DType::Bool,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F16,
        DType::F32,
        DType::F64,
    ];

    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 | DType::F16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    pub fn is_int(&self) -> bool {
        !self.is_float() && !self.is_bool()
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DType::I8 | DType::I16 | DType::I32 | DType::I64 | DType::F16 | DType::F32 | DType::F64
        )
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, DType::Bool)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Whether `astype` can convert from `self` to `target`.
    ///
    /// Every conversion is permitted except float to bool, which has no
    /// unambiguous truth value for NaN.
    pub fn can_cast_to(&self, target: DType) -> bool {
        !(self.is_float() && target.is_bool())
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Row-major element buffer, one variant per [`DType`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_buffer {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            TensorData::Bool($values) => $body,
            TensorData::I8($values) => $body,
            TensorData::I16($values) => $body,
            TensorData::I32($values) => $body,
            TensorData::I64($values) => $body,
            TensorData::U8($values) => $body,
            TensorData::U16($values) => $body,
            TensorData::U32($values) => $body,
            TensorData::U64($values) => $body,
            TensorData::F16($values) => $body,
            TensorData::F32($values) => $body,
            TensorData::F64($values) => $body,
        }
    };
}

macro_rules! rebuild_buffer {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            TensorData::Bool($values) => TensorData::Bool($body),
            TensorData::I8($values) => TensorData::I8($body),
            TensorData::I16($values) => TensorData::I16($body),
            TensorData::I32($values) => TensorData::I32($body),
            TensorData::I64($values) => TensorData::I64($body),
            TensorData::U8($values) => TensorData::U8($body),
            TensorData::U16($values) => TensorData::U16($body),
            TensorData::U32($values) => TensorData::U32($body),
            TensorData::U64($values) => TensorData::U64($body),
            TensorData::F16($values) => TensorData::F16($body),
            TensorData::F32($values) => TensorData::F32($body),
            TensorData::F64($values) => TensorData::F64($body),
        }
    };
}

macro_rules! extend_matching {
    ($target:expr, $source:expr; $($variant:ident),*) => {
        match ($target, $source) {
            $((TensorData::$variant(target), TensorData::$variant(source)) => {
                target.extend_from_slice(source);
                true
            })*
            _ => false,
        }
    };
}

// Saturating numeric conversion; NaN becomes zero for integer targets.
fn saturate<T: NumCast + num_traits::Bounded + Default>(value: f64) -> T {
    if value.is_nan() {
        return T::default();
    }
    match T::from(value) {
        Some(converted) => converted,
        None if value > 0.0 => T::max_value(),
        None => T::min_value(),
    }
}

fn saturate_i64<T: NumCast + num_traits::Bounded>(value: i64) -> T {
    match T::from(value) {
        Some(converted) => converted,
        None if value > 0 => T::max_value(),
        None => T::min_value(),
    }
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Bool(_) => DType::Bool,
            TensorData::I8(_) => DType::I8,
            TensorData::I16(_) => DType::I16,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::U8(_) => DType::U8,
            TensorData::U16(_) => DType::U16,
            TensorData::U32(_) => DType::U32,
            TensorData::U64(_) => DType::U64,
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_buffer!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every element widened to `f64`; bool maps to 0/1.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            TensorData::Bool(values) => values
                .iter()
                .map(|&value| if value { 1.0 } else { 0.0 })
                .collect(),
            TensorData::F16(values) => values.iter().map(|value| value.to_f64()).collect(),
            TensorData::I8(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::I16(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::I32(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::I64(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::U8(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::U16(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::U32(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::U64(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::F32(values) => values.iter().map(|&v| v as f64).collect(),
            TensorData::F64(values) => values.clone(),
        }
    }

    /// Integer view of the buffer. Floats truncate toward zero, `u64` above
    /// `i64::MAX` saturates.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        match self {
            TensorData::Bool(values) => values.iter().map(|&value| value as i64).collect(),
            TensorData::I8(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::I16(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::I32(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::I64(values) => values.clone(),
            TensorData::U8(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::U16(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::U32(values) => values.iter().map(|&v| v as i64).collect(),
            TensorData::U64(values) => values
                .iter()
                .map(|&value| value.to_i64().unwrap_or(i64::MAX))
                .collect(),
            float => float
                .to_f64_vec()
                .into_iter()
                .map(saturate::<i64>)
                .collect(),
        }
    }

    pub fn from_f64(dtype: DType, values: &[f64]) -> TensorData {
        match dtype {
            DType::Bool => TensorData::Bool(values.iter().map(|&v| v != 0.0).collect()),
            DType::I8 => TensorData::I8(values.iter().map(|&v| saturate(v)).collect()),
            DType::I16 => TensorData::I16(values.iter().map(|&v| saturate(v)).collect()),
            DType::I32 => TensorData::I32(values.iter().map(|&v| saturate(v)).collect()),
            DType::I64 => TensorData::I64(values.iter().map(|&v| saturate(v)).collect()),
            DType::U8 => TensorData::U8(values.iter().map(|&v| saturate(v)).collect()),
            DType::U16 => TensorData::U16(values.iter().map(|&v| saturate(v)).collect()),
            DType::U32 => TensorData::U32(values.iter().map(|&v| saturate(v)).collect()),
            DType::U64 => TensorData::U64(values.iter().map(|&v| saturate(v)).collect()),
            DType::F16 => TensorData::F16(values.iter().map(|&v| f16::from_f64(v)).collect()),
            DType::F32 => TensorData::F32(values.iter().map(|&v| v as f32).collect()),
            DType::F64 => TensorData::F64(values.to_vec()),
        }
    }

    pub fn from_i64(dtype: DType, values: &[i64]) -> TensorData {
        match dtype {
            DType::Bool => TensorData::Bool(values.iter().map(|&v| v != 0).collect()),
            DType::I8 => TensorData::I8(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::I16 => TensorData::I16(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::I32 => TensorData::I32(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::I64 => TensorData::I64(values.to_vec()),
            DType::U8 => TensorData::U8(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::U16 => TensorData::U16(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::U32 => TensorData::U32(values.iter().map(|&v| saturate_i64(v)).collect()),
            DType::U64 => TensorData::U64(values.iter().map(|&v| saturate_i64(v)).collect()),
            float => {
                let widened: Vec<f64> = values.iter().map(|&v| v as f64).collect();
                TensorData::from_f64(float, &widened)
            }
        }
    }

    /// Elementwise conversion. Integer to integer conversions go through
    /// `i64` so they stay exact.
    pub(crate) fn convert(&self, dtype: DType) -> TensorData {
        if self.dtype() == dtype {
            return self.clone();
        }
        if self.dtype().is_float() || dtype.is_float() {
            TensorData::from_f64(dtype, &self.to_f64_vec())
        } else {
            TensorData::from_i64(dtype, &self.to_i64_vec())
        }
    }

    /// Elements at `positions`, in order. Positions must be in range.
    pub(crate) fn gather(&self, positions: &[usize]) -> TensorData {
        rebuild_buffer!(self, values => positions.iter().map(|&at| values[at]).collect())
    }

    /// Appends `other` when both buffers hold the same dtype.
    pub(crate) fn extend(&mut self, other: &TensorData) -> bool {
        extend_matching!(self, other; Bool, I8, I16, I32, I64, U8, U16, U32, U64, F16, F32, F64)
    }

    /// Element rendered for display.
    pub(crate) fn format_element(&self, index: usize) -> String {
        for_each_buffer!(self, values => values
            .get(index)
            .map(|value| format!("{}", value))
            .unwrap_or_default())
    }
}

/// Rust scalar types that can back a tensor.
pub trait Element: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> TensorData;

    fn slice(data: &TensorData) -> Option<&[Self]>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$variant;

                fn into_data(values: Vec<Self>) -> TensorData {
                    TensorData::$variant(values)
                }

                fn slice(data: &TensorData) -> Option<&[Self]> {
                    match data {
                        TensorData::$variant(values) => Some(values),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f16 => F16,
    f32 => F32,
    f64 => F64,
);
