use thiserror::Error;

use crate::{session::SessionState, tensor_grad::DType};

/// Every failure that can cross the crate boundary.
///
/// Variants carry the operator and the offending attribute, input or dimension
/// so callers can match on the kind instead of parsing messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error("Operator {name:?} is not registered")]
    UnknownOperator { name: String },

    #[error("Operator {name:?} is already registered")]
    DuplicateOperator { name: String },

    #[error("Operator {op:?} expected {expected} inputs, received {actual}")]
    ArityError {
        op: String,
        expected: String,
        actual: usize,
    },

    #[error("Operator {op:?}: {name} must be {expected}, got {actual}")]
    AttributeTypeError {
        op: String,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Operator {op:?}: {detail}")]
    ShapeMismatch {
        op: String,
        dim: Option<usize>,
        expected: usize,
        actual: usize,
        detail: String,
    },

    #[error("Cannot cast {from} to {to}")]
    UnsupportedCast { from: DType, to: DType },

    #[error("Operator {op:?} has no gradient rule")]
    NoGradientDefined { op: String },

    #[error("Cannot {action} while the session is {state}")]
    InvalidSessionState { action: String, state: SessionState },

    #[error("Operator {op:?} output {index} was inferred as {inferred} but the rule produced {actual}")]
    InternalInferenceMismatch {
        op: String,
        index: usize,
        inferred: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, OpError>;

impl OpError {
    pub(crate) fn attribute_type(
        op: &str,
        name: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        OpError::AttributeTypeError {
            op: op.to_string(),
            name: name.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Two aligned dimensions that cannot be broadcast together.
    pub(crate) fn broadcast(op: &str, dim: usize, lhs: usize, rhs: usize) -> Self {
        OpError::ShapeMismatch {
            op: op.to_string(),
            dim: Some(dim),
            expected: lhs,
            actual: rhs,
            detail: format!(
                "shapes are not broadcastable at dimension {}: {} vs {}",
                dim, lhs, rhs
            ),
        }
    }

    pub(crate) fn shape(
        op: &str,
        dim: Option<usize>,
        expected: usize,
        actual: usize,
        detail: impl Into<String>,
    ) -> Self {
        OpError::ShapeMismatch {
            op: op.to_string(),
            dim,
            expected,
            actual,
            detail: detail.into(),
        }
    }

    pub(crate) fn session(action: impl Into<String>, state: SessionState) -> Self {
        OpError::InvalidSessionState {
            action: action.into(),
            state,
        }
    }

    pub(crate) fn mismatch(
        op: &str,
        index: usize,
        inferred: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        OpError::InternalInferenceMismatch {
            op: op.to_string(),
            index,
            inferred: inferred.into(),
            actual: actual.into(),
        }
    }

    /// The operator the failure was reported against, if any.
    pub fn operator(&self) -> Option<&str> {
        match self {
            OpError::UnknownOperator { name } | OpError::DuplicateOperator { name } => Some(name),
            OpError::ArityError { op, .. }
            | OpError::AttributeTypeError { op, .. }
            | OpError::ShapeMismatch { op, .. }
            | OpError::NoGradientDefined { op }
            | OpError::InternalInferenceMismatch { op, .. } => Some(op),
            OpError::UnsupportedCast { .. } | OpError::InvalidSessionState { .. } => None,
        }
    }

    /// The attribute or input slot an `AttributeTypeError` refers to.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            OpError::AttributeTypeError { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Validation failures caused by the caller, as opposed to operator defects
    /// or lifecycle misuse.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OpError::ArityError { .. }
                | OpError::AttributeTypeError { .. }
                | OpError::ShapeMismatch { .. }
        )
    }
}
