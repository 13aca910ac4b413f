//! # stablemax
//!
//! **Numerically stable softmax and log-softmax with accelerated-backend dispatch.**
//!
//! stablemax evaluates softmax, log-softmax and their gradients along one
//! axis of a strided tensor view. Every kernel subtracts the per-slice
//! maximum before exponentiating, so inputs like `[1e30, 0]` or `[-1e30, 0]`
//! produce finite, exact results.
//!
//! ## Layers
//!
//! ```text
//! operator   SoftmaxOp / SoftmaxGradOp, arity checks, gradient linkage, registry
//!    │
//! runtime    Dispatcher: accelerated (AVX2) or generic, padded → dense fallback
//!    │
//! ops        softmax / log_softmax forward + backward kernels
//!    │
//! ops::reduce  stabilized max / sum / sum-exp / log-sum-exp per axis
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use stablemax::prelude::*;
//!
//! let x = Tensor::from_slice(&[1.0f32, 2.0, 0.1], &[3])?;
//! let mut y = Tensor::<f32>::zeros(&[3]);
//!
//! let dispatcher = Dispatcher::new();
//! let op = SoftmaxOp::new(SoftmaxParam::log_softmax(-1));
//! op.forward(
//!     OpContext::inference(&dispatcher),
//!     &[x.view()],
//!     &[OpReq::WriteTo],
//!     &mut [y.view_mut()],
//! )?;
//! assert!((y.data()[0] + 1.417_03).abs() < 1e-4);
//! # Ok::<(), stablemax::error::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): Parallel loop over independent batch slices
//! - `simd` (default): AVX2+FMA accelerated backend, detected at runtime
//! - `f16`: Half-precision element types (F16, BF16)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dtype;
pub mod error;
pub mod operator;
pub mod ops;
pub mod runtime;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::{DType, Element};
    pub use crate::error::{Error, Result};
    pub use crate::operator::{OpContext, OpRegistry, SoftmaxGradOp, SoftmaxOp, SoftmaxParam};
    pub use crate::ops::{OpReq, SoftmaxMode};
    pub use crate::runtime::{BackendDecision, Dispatcher, EngineConfig};
    pub use crate::tensor::{Layout, MemoryFormat, Tensor, TensorView, TensorViewMut};
}
