//! Generic backend over the portable kernels

use super::backend::SoftmaxBackend;
use crate::dtype::Element;
use crate::error::Result;
use crate::ops::softmax::{self, GENERIC, KernelOptions};
use crate::ops::{OpReq, SoftmaxMode};
use crate::tensor::{TensorView, TensorViewMut};

/// Portable backend that handles every element type, axis and dense layout
///
/// Also usable as the accelerated slot of a [`Dispatcher`](super::Dispatcher)
/// to pin every call to the portable kernels.
#[derive(Copy, Clone, Debug, Default)]
pub struct GenericBackend;

impl GenericBackend {
    /// Backward pass along a normalized `axis`
    #[allow(clippy::too_many_arguments)]
    pub fn backward<T: Element>(
        &self,
        mode: SoftmaxMode,
        grad_output: &TensorView<'_, T>,
        output: &TensorView<'_, T>,
        axis: usize,
        req: OpReq,
        grad_input: &mut TensorViewMut<'_, T>,
        opts: &KernelOptions,
    ) -> Result<()> {
        softmax::backward(mode, grad_output, output, axis as isize, req, grad_input, opts)
    }
}

impl SoftmaxBackend for GenericBackend {
    fn name(&self) -> &'static str {
        GENERIC
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_mode(&self, _mode: SoftmaxMode) -> bool {
        true
    }

    fn supports_layout<T: Element>(&self, input: &TensorView<'_, T>) -> bool {
        input.format().is_dense()
    }

    fn forward<T: Element>(
        &self,
        mode: SoftmaxMode,
        input: &TensorView<'_, T>,
        axis: usize,
        req: OpReq,
        output: &mut TensorViewMut<'_, T>,
        opts: &KernelOptions,
    ) -> Result<()> {
        softmax::forward(mode, input, axis as isize, req, output, opts)
    }
}
