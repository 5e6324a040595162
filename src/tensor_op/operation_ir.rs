use std::{collections::BTreeMap, fmt};

use itertools::Itertools;

use crate::tensor_grad::DType;

use super::error::{OpError, Result};

/// A reference to another operator together with its attributes, as carried by
/// list-of-operations attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub name: String,
    pub attrs: Attributes,
}

impl OpSpec {
    pub fn new(name: &str) -> Self {
        OpSpec {
            name: name.to_string(),
            attrs: Attributes::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.set(name, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    DType(DType),
    Ops(Vec<OpSpec>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Bool,
    Int,
    Float,
    Str,
    Ints,
    Floats,
    DType,
    Ops,
}

impl AttrType {
    pub fn describe(&self) -> &'static str {
        match self {
            AttrType::Bool => "a bool",
            AttrType::Int => "an integer",
            AttrType::Float => "a float",
            AttrType::Str => "a string",
            AttrType::Ints => "a list of integers",
            AttrType::Floats => "a list of floats",
            AttrType::DType => "a dtype",
            AttrType::Ops => "a list of operations",
        }
    }
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::Str(_) => AttrType::Str,
            AttrValue::Ints(_) => AttrType::Ints,
            AttrValue::Floats(_) => AttrType::Floats,
            AttrValue::DType(_) => AttrType::DType,
            AttrValue::Ops(_) => AttrType::Ops,
        }
    }

    /// Converts the value to `ty` where that is lossless: integers widen to
    /// floats and a single value stands for a one-element list. A float never
    /// narrows to an integer.
    pub fn conform(self, ty: AttrType) -> Option<AttrValue> {
        match (self, ty) {
            (value, ty) if value.attr_type() == ty => Some(value),
            (AttrValue::Int(v), AttrType::Float) => Some(AttrValue::Float(v as f64)),
            (AttrValue::Int(v), AttrType::Ints) => Some(AttrValue::Ints(vec![v])),
            (AttrValue::Int(v), AttrType::Floats) => Some(AttrValue::Floats(vec![v as f64])),
            (AttrValue::Float(v), AttrType::Floats) => Some(AttrValue::Floats(vec![v])),
            (AttrValue::Ints(vs), AttrType::Floats) => {
                Some(AttrValue::Floats(vs.into_iter().map(|v| v as f64).collect()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{:?}", v),
            AttrValue::Ints(vs) => write!(f, "[{}]", vs.iter().join(", ")),
            AttrValue::Floats(vs) => write!(f, "[{}]", vs.iter().join(", ")),
            AttrValue::DType(v) => write!(f, "{}", v),
            AttrValue::Ops(ops) => write!(f, "[{}]", ops.iter().map(|op| &op.name).join(", ")),
        }
    }
}

macro_rules! attr_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for AttrValue {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

attr_from!(
    bool => |v| AttrValue::Bool(v),
    i64 => |v| AttrValue::Int(v),
    i32 => |v| AttrValue::Int(v as i64),
    usize => |v| AttrValue::Int(v as i64),
    f64 => |v| AttrValue::Float(v),
    f32 => |v| AttrValue::Float(v as f64),
    &str => |v| AttrValue::Str(v.to_string()),
    String => |v| AttrValue::Str(v),
    Vec<i64> => |v| AttrValue::Ints(v),
    &[i64] => |v| AttrValue::Ints(v.to_vec()),
    Vec<usize> => |v| AttrValue::Ints(v.into_iter().map(|x| x as i64).collect()),
    &[usize] => |v| AttrValue::Ints(v.iter().map(|&x| x as i64).collect()),
    Vec<f64> => |v| AttrValue::Floats(v),
    DType => |v| AttrValue::DType(v),
    Vec<OpSpec> => |v| AttrValue::Ops(v),
);

/// Declared attribute: name, type and an optional default.
#[derive(Debug, Clone)]
pub struct AttrSpec {
    pub name: &'static str,
    pub ty: AttrType,
    pub default: Option<AttrValue>,
}

/// Named attribute values of one invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    values: BTreeMap<String, AttrValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Attributes::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.values.iter()
    }

    fn require(&self, op: &str, name: &str, ty: AttrType) -> Result<&AttrValue> {
        self.values
            .get(name)
            .ok_or_else(|| OpError::attribute_type(op, name, ty.describe(), "nothing"))
    }

    fn wrong(op: &str, name: &str, ty: AttrType, actual: &AttrValue) -> OpError {
        OpError::attribute_type(op, name, ty.describe(), actual.to_string())
    }

    pub fn int(&self, op: &str, name: &str) -> Result<i64> {
        match self.require(op, name, AttrType::Int)? {
            AttrValue::Int(v) => Ok(*v),
            other => Err(Self::wrong(op, name, AttrType::Int, other)),
        }
    }

    pub fn float(&self, op: &str, name: &str) -> Result<f64> {
        match self.require(op, name, AttrType::Float)? {
            AttrValue::Float(v) => Ok(*v),
            AttrValue::Int(v) => Ok(*v as f64),
            other => Err(Self::wrong(op, name, AttrType::Float, other)),
        }
    }

    pub fn bool(&self, op: &str, name: &str) -> Result<bool> {
        match self.require(op, name, AttrType::Bool)? {
            AttrValue::Bool(v) => Ok(*v),
            other => Err(Self::wrong(op, name, AttrType::Bool, other)),
        }
    }

    pub fn ints(&self, op: &str, name: &str) -> Result<Vec<i64>> {
        match self.require(op, name, AttrType::Ints)? {
            AttrValue::Ints(vs) => Ok(vs.clone()),
            AttrValue::Int(v) => Ok(vec![*v]),
            other => Err(Self::wrong(op, name, AttrType::Ints, other)),
        }
    }

    pub fn dtype(&self, op: &str, name: &str) -> Result<DType> {
        match self.require(op, name, AttrType::DType)? {
            AttrValue::DType(v) => Ok(*v),
            other => Err(Self::wrong(op, name, AttrType::DType, other)),
        }
    }

    pub fn ops(&self, op: &str, name: &str) -> Result<&[OpSpec]> {
        match self.require(op, name, AttrType::Ops)? {
            AttrValue::Ops(ops) => Ok(ops),
            other => Err(Self::wrong(op, name, AttrType::Ops, other)),
        }
    }
}
