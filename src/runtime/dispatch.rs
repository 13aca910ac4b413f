//! Per-call backend selection
//!
//! The dispatcher routes each softmax call to either the accelerated backend
//! or the generic kernels. The decision is recomputed on every call from the
//! operator configuration, the training flag, the input layout and the
//! engine configuration; the dispatcher keeps no state between calls.
//!
//! ```text
//!                  ┌──────────── preference = generic ─────────────┐
//!                  ├──────────── training pass ────────────────────┤
//!   forward ──────►├──────────── backend unavailable / mode ───────┼──► Generic
//!                  ├──────────── negative axis (reject policy) ────┤     (padded input
//!                  ├──────────── layout not supported ─────────────┘      copied to dense)
//!                  └──────────────────────────────────────────────────► Accelerated
//!
//!   backward ───────────────────────────────────────────────────────► Generic
//! ```

use super::backend::{BackendDecision, SoftmaxBackend};
use super::config::{EngineConfig, NegativeAxisPolicy};
use super::generic::GenericBackend;
use super::simd::SimdBackend;
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::operator::OpConfig;
use crate::ops::softmax::KernelOptions;
use crate::ops::{OpReq, SoftmaxMode};
use crate::tensor::{Tensor, TensorView, TensorViewMut};

/// Backend selector for the softmax operators
///
/// Generic over the accelerated backend so callers can plug in their own;
/// the default is the AVX2 [`SimdBackend`].
#[derive(Clone, Debug)]
pub struct Dispatcher<A: SoftmaxBackend = SimdBackend> {
    accelerated: A,
    generic: GenericBackend,
    config: EngineConfig,
}

impl Dispatcher<SimdBackend> {
    /// Dispatcher over the detected SIMD backend with the process-wide
    /// configuration from [`EngineConfig::global`]
    pub fn new() -> Self {
        Self::with_backend(SimdBackend::default(), EngineConfig::global().clone())
    }
}

impl Default for Dispatcher<SimdBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: SoftmaxBackend> Dispatcher<A> {
    /// Dispatcher over an explicit accelerated backend and configuration
    pub fn with_backend(accelerated: A, config: EngineConfig) -> Self {
        Self {
            accelerated,
            generic: GenericBackend,
            config,
        }
    }

    /// Engine configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The accelerated backend
    pub fn accelerated(&self) -> &A {
        &self.accelerated
    }

    /// Choose a backend for a forward call
    ///
    /// Pure: the same arguments always give the same answer. An axis that
    /// does not fit the input selects `Generic`; the error itself is raised
    /// by [`Dispatcher::forward`].
    pub fn decide<T: Element>(
        &self,
        config: &OpConfig,
        input: &TensorView<'_, T>,
        is_training: bool,
    ) -> BackendDecision {
        let name = self.accelerated.name();
        let mode = config.mode();

        if !self.config.allows_accelerated() {
            return fallback(mode, "generic backend forced by configuration");
        }
        if is_training {
            return fallback(mode, "training pass");
        }
        if !self.accelerated.is_available() {
            return fallback(mode, &format!("{name} unavailable"));
        }
        if !self.accelerated.supports_mode(mode) {
            return fallback(mode, &format!("{name} does not implement {mode}"));
        }
        if config.resolve_axis(input.ndim()).is_err() {
            return fallback(mode, "axis out of range");
        }
        if config.axis() < 0 && self.config.negative_axis == NegativeAxisPolicy::RejectAccelerated {
            return fallback(mode, "negative axis");
        }
        if !self.accelerated.supports_layout(input) {
            return fallback(
                mode,
                &format!(
                    "{name} rejected {:?} layout {:?} ({})",
                    input.dtype(),
                    input.layout(),
                    input.format()
                ),
            );
        }
        BackendDecision::Accelerated
    }

    /// Forward pass through the selected backend
    ///
    /// Returns the decision taken. Axis, shape and output-aliasing errors are
    /// raised before any backend runs.
    pub fn forward<T: Element>(
        &self,
        config: &OpConfig,
        input: &TensorView<'_, T>,
        req: OpReq,
        output: &mut TensorViewMut<'_, T>,
        is_training: bool,
    ) -> Result<BackendDecision> {
        let axis = config.resolve_axis(input.ndim())?;
        check_output(input.shape(), output, self.accelerated.name())?;

        let decision = self.decide(config, input, is_training);
        if req == OpReq::Null {
            return Ok(decision);
        }

        let mode = config.mode();
        let opts = self.config.kernel_options();
        match decision {
            BackendDecision::Accelerated => {
                if self.config.verify_accelerated {
                    self.forward_verified(mode, input, axis, req, output, &opts)?;
                } else {
                    self.accelerated.forward(mode, input, axis, req, output, &opts)?;
                }
                log::debug!(
                    "{mode} forward on {} (shape={:?}, axis={axis})",
                    self.accelerated.name(),
                    input.shape()
                );
            }
            BackendDecision::Generic => {
                let dense = densify(input);
                let input = dense.as_ref().map_or_else(|| input.clone(), Tensor::view);
                self.generic.forward(mode, &input, axis, req, output, &opts)?;
            }
        }
        Ok(decision)
    }

    /// Backward pass; always runs the generic kernels
    ///
    /// `grad_output` is the gradient of the forward output and `output` the
    /// saved forward output. Padded views are copied to dense first. Axis,
    /// shape and output-aliasing errors are raised even for `OpReq::Null`.
    pub fn backward<T: Element>(
        &self,
        config: &OpConfig,
        grad_output: &TensorView<'_, T>,
        output: &TensorView<'_, T>,
        req: OpReq,
        grad_input: &mut TensorViewMut<'_, T>,
    ) -> Result<BackendDecision> {
        let axis = config.resolve_axis(output.ndim())?;
        if grad_output.shape() != output.shape() {
            return Err(Error::shape_mismatch(output.shape(), grad_output.shape()));
        }
        check_output(output.shape(), grad_input, self.generic.name())?;
        if req == OpReq::Null {
            return Ok(BackendDecision::Generic);
        }

        let dense_grad = densify(grad_output);
        let dense_out = densify(output);
        let grad_output = dense_grad.as_ref().map_or_else(|| grad_output.clone(), Tensor::view);
        let output = dense_out.as_ref().map_or_else(|| output.clone(), Tensor::view);

        let opts = self.config.kernel_options();
        self.generic
            .backward(config.mode(), &grad_output, &output, axis, req, grad_input, &opts)?;
        log::debug!(
            "{} on generic (shape={:?}, axis={axis})",
            config.mode().backward_name(),
            output.shape()
        );
        Ok(BackendDecision::Generic)
    }

    /// Accelerated forward cross-checked against the generic kernels
    fn forward_verified<T: Element>(
        &self,
        mode: SoftmaxMode,
        input: &TensorView<'_, T>,
        axis: usize,
        req: OpReq,
        output: &mut TensorViewMut<'_, T>,
        opts: &KernelOptions,
    ) -> Result<()> {
        let mut fast = Tensor::<T>::zeros(input.shape());
        self.accelerated
            .forward(mode, input, axis, OpReq::WriteTo, &mut fast.view_mut(), opts)?;

        let dense = densify(input);
        let reference_input = dense.as_ref().map_or_else(|| input.clone(), Tensor::view);
        let mut reference = Tensor::<T>::zeros(input.shape());
        self.generic.forward(
            mode,
            &reference_input,
            axis,
            OpReq::WriteTo,
            &mut reference.view_mut(),
            opts,
        )?;

        let max_diff = scaled_max_diff(fast.data(), reference.data());
        let tolerance = self.config.verify_tolerance;
        if max_diff > tolerance {
            log::warn!(
                "{mode} on {} disagrees with generic kernel: {max_diff} > {tolerance}",
                self.accelerated.name()
            );
            return Err(Error::AcceleratedMismatch {
                backend: self.accelerated.name(),
                max_diff,
                tolerance,
            });
        }

        let layout = output.layout().clone();
        let dst = output.data_mut();
        for (offset, v) in layout.offsets().zip(fast.data()) {
            dst[offset] = req.combine(dst[offset], v.to_f64());
        }
        Ok(())
    }
}

fn fallback(mode: SoftmaxMode, reason: &str) -> BackendDecision {
    log::debug!("{mode} generic fallback: {reason}");
    BackendDecision::Generic
}

/// Shape and aliasing checks on an output view, run before any backend
fn check_output<T: Element>(
    expected: &[usize],
    output: &TensorViewMut<'_, T>,
    backend: &'static str,
) -> Result<()> {
    if expected != output.shape() {
        return Err(Error::shape_mismatch(expected, output.shape()));
    }
    if output.layout().has_internal_overlap() {
        return Err(Error::layout(
            backend,
            format!("output layout {:?} aliases elements", output.layout()),
        ));
    }
    Ok(())
}

/// Dense copy of a non-dense view
fn densify<T: Element>(view: &TensorView<'_, T>) -> Option<Tensor<T>> {
    if view.format().is_dense() {
        return None;
    }
    log::debug!(
        "converting {} view {:?} to dense for generic kernels",
        view.format(),
        view.shape()
    );
    Some(view.to_dense())
}

/// Largest `|a - b| / max(1, |b|)`; a NaN on only one side counts as infinite
fn scaled_max_diff<T: Element>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let (x, y) = (x.to_f64(), y.to_f64());
            match (x.is_nan(), y.is_nan()) {
                (true, true) => 0.0,
                (false, false) if x == y => 0.0,
                (false, false) => (x - y).abs() / y.abs().max(1.0),
                _ => f64::INFINITY,
            }
        })
        .fold(0.0, f64::max)
}
