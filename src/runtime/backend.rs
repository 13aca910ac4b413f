//! Backend abstraction for the softmax forward pass

use crate::dtype::Element;
use crate::error::Result;
use crate::ops::softmax::KernelOptions;
use crate::ops::{OpReq, SoftmaxMode};
use crate::tensor::{TensorView, TensorViewMut};
use std::fmt;

/// Outcome of a dispatch decision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendDecision {
    /// Run on the accelerated backend
    Accelerated,
    /// Run the generic kernels
    Generic,
}

impl fmt::Display for BackendDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerated => f.write_str("accelerated"),
            Self::Generic => f.write_str("generic"),
        }
    }
}

/// A compute backend that can evaluate the softmax forward pass
///
/// Implementations are consulted by [`Dispatcher`](super::Dispatcher) in
/// inference mode only. `supports_layout` is the whole capability contract:
/// if it returns `true` for a view, `forward` must accept that view, and a
/// [`LayoutRejected`](crate::error::Error::LayoutRejected) error from
/// `forward` is treated as a bug in the backend.
pub trait SoftmaxBackend: Send + Sync {
    /// Short backend name used in logs and errors
    fn name(&self) -> &'static str;

    /// Whether the backend can run on this machine
    fn is_available(&self) -> bool;

    /// Whether the backend implements the given normalization
    fn supports_mode(&self, mode: SoftmaxMode) -> bool;

    /// Whether the backend accepts this concrete input layout
    fn supports_layout<T: Element>(&self, input: &TensorView<'_, T>) -> bool;

    /// Evaluate the forward pass along a normalized `axis`
    fn forward<T: Element>(
        &self,
        mode: SoftmaxMode,
        input: &TensorView<'_, T>,
        axis: usize,
        req: OpReq,
        output: &mut TensorViewMut<'_, T>,
        opts: &KernelOptions,
    ) -> Result<()>;
}
