//! Error types for stablemax

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using stablemax's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stablemax operations
#[derive(Error, Debug)]
pub enum Error {
    /// Shape mismatch between views that must agree
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Invalid (out of range) axis
    #[error("Invalid dimension {dim} for tensor with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension, as requested
        dim: isize,
        /// Number of dimensions
        ndim: usize,
    },

    /// Wrong number of inputs, outputs or write requests handed to an operator
    #[error("Operator '{op}' expects {expected} {role}, got {got}")]
    Arity {
        /// Operator name
        op: &'static str,
        /// Which list was wrong ("inputs", "outputs", "req entries")
        role: &'static str,
        /// Expected count
        expected: usize,
        /// Supplied count
        got: usize,
    },

    /// A backend refused a memory layout it was handed
    #[error("{backend} rejected layout: {reason}")]
    LayoutRejected {
        /// The backend that rejected the layout
        backend: &'static str,
        /// Description of the problem
        reason: String,
    },

    /// Unsupported dtype for an operation
    #[error("Unsupported dtype {dtype:?} for operation '{op}'")]
    UnsupportedDType {
        /// The unsupported dtype
        dtype: DType,
        /// The operation name
        op: &'static str,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// No operator registered under the requested name
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    /// Accelerated and generic results disagree (verification mode)
    #[error("{backend} result differs from generic kernel: max diff {max_diff} > {tolerance}")]
    AcceleratedMismatch {
        /// The accelerated backend
        backend: &'static str,
        /// Largest element-wise difference, scaled by `max(1, |generic|)`
        max_diff: f64,
        /// Allowed difference
        tolerance: f64,
    },

    /// Backend-specific runtime failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Coarse classification of [`Error`] values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Axis out of range or shape disagreement
    Shape,
    /// Wrong input/output count
    Arity,
    /// Layout refused by a backend
    Layout,
    /// Anything else
    Other,
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an arity error
    pub fn arity(op: &'static str, role: &'static str, expected: usize, got: usize) -> Self {
        Self::Arity {
            op,
            role,
            expected,
            got,
        }
    }

    /// Create a layout rejection error
    pub fn layout(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::LayoutRejected {
            backend,
            reason: reason.into(),
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype(dtype: DType, op: &'static str) -> Self {
        Self::UnsupportedDType { dtype, op }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(arg: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            arg,
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShapeMismatch { .. } | Self::InvalidDimension { .. } => ErrorKind::Shape,
            Self::Arity { .. } => ErrorKind::Arity,
            Self::LayoutRejected { .. } => ErrorKind::Layout,
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::shape_mismatch(&[2], &[3]).kind(), ErrorKind::Shape);
        assert_eq!(
            Error::InvalidDimension { dim: 3, ndim: 2 }.kind(),
            ErrorKind::Shape
        );
        assert_eq!(Error::arity("softmax", "inputs", 1, 2).kind(), ErrorKind::Arity);
        assert_eq!(Error::layout("AVX2", "strided").kind(), ErrorKind::Layout);
        assert_eq!(Error::Backend("boom".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_error_display() {
        let err = Error::arity("_backward_softmax", "inputs", 2, 1);
        assert_eq!(
            err.to_string(),
            "Operator '_backward_softmax' expects 2 inputs, got 1"
        );
    }
}
