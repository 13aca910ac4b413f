//! Softmax operations
//!
//! This module holds the two compute layers every backend builds on:
//!
//! ```text
//! softmax        four kernels: {softmax, log_softmax} x {forward, backward}
//!   └── reduce   stabilized per-axis max / sum / sum-exp / log-sum-exp
//! ```
//!
//! Kernels take borrowed views, a write request ([`OpReq`]) and an output
//! view. They never allocate for the output and never retain references past
//! a call.
//!
//! # Write requests
//!
//! | `OpReq`   | Effect on the output element `o` for result `r` |
//! |-----------|--------------------------------------------------|
//! | `WriteTo` | `o = r`                                          |
//! | `AddTo`   | `o = o + r`                                      |
//! | `Null`    | output untouched, kernel returns immediately     |

pub mod reduce;
pub mod softmax;

pub use reduce::{ReduceKind, reduce};
pub use softmax::{
    log_softmax_backward, log_softmax_forward, softmax_backward, softmax_forward,
};

use crate::dtype::Element;
use std::fmt;

/// How a kernel combines its result with the existing output contents
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum OpReq {
    /// Overwrite the output
    #[default]
    WriteTo,
    /// Accumulate into the output
    AddTo,
    /// Do not write at all
    Null,
}

impl OpReq {
    /// Combine a result computed in `f64` with the current output value
    #[inline]
    pub fn combine<T: Element>(self, current: T, value: f64) -> T {
        match self {
            Self::WriteTo => T::from_f64(value),
            Self::AddTo => T::from_f64(current.to_f64() + value),
            Self::Null => current,
        }
    }
}

/// Which of the two normalizations to compute
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SoftmaxMode {
    /// `exp(x - max) / sum`
    #[default]
    Softmax,
    /// `x - max - ln(sum)`
    LogSoftmax,
}

impl SoftmaxMode {
    /// Operator name of the forward pass
    pub fn forward_name(self) -> &'static str {
        match self {
            Self::Softmax => "softmax",
            Self::LogSoftmax => "log_softmax",
        }
    }

    /// Operator name of the backward pass
    pub fn backward_name(self) -> &'static str {
        match self {
            Self::Softmax => "_backward_softmax",
            Self::LogSoftmax => "_backward_log_softmax",
        }
    }
}

impl fmt::Display for SoftmaxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.forward_name())
    }
}

/// Forward or backward evaluation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Compute outputs from inputs
    Forward,
    /// Compute input gradients from output gradients and saved outputs
    Backward,
}

/// One of the four kernels
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelVariant {
    /// Normalization
    pub mode: SoftmaxMode,
    /// Direction
    pub pass: Pass,
}

impl KernelVariant {
    /// Operator name of this variant
    pub fn name(&self) -> &'static str {
        match self.pass {
            Pass::Forward => self.mode.forward_name(),
            Pass::Backward => self.mode.backward_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_combine() {
        assert_eq!(OpReq::WriteTo.combine(5.0f32, 1.5), 1.5);
        assert_eq!(OpReq::AddTo.combine(5.0f32, 1.5), 6.5);
        assert_eq!(OpReq::Null.combine(5.0f64, 1.5), 5.0);
    }

    #[test]
    fn test_variant_names() {
        let v = KernelVariant {
            mode: SoftmaxMode::LogSoftmax,
            pass: Pass::Backward,
        };
        assert_eq!(v.name(), "_backward_log_softmax");
        assert_eq!(SoftmaxMode::Softmax.to_string(), "softmax");
    }
}
