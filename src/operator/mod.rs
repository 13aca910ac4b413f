//! Graph-facing softmax operators
//!
//! An operator owns its configuration and is called with borrowed views. It
//! validates argument counts, resolves the axis and hands the call to a
//! [`Dispatcher`].
//!
//! ```text
//! SoftmaxOp      data            -> output    (forward)
//! SoftmaxGradOp  ograd, output   -> igrad     (backward)
//! ```
//!
//! The backward pass is computed from the forward *output*, not the input;
//! [`SoftmaxOp::gradient`] reports this so a graph keeps `output` alive until
//! the backward call.

pub mod registry;

pub use registry::{OpFactory, OpRegistry, Operator};

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::ops::{KernelVariant, OpReq, Pass, SoftmaxMode};
use crate::runtime::{BackendDecision, Dispatcher, SoftmaxBackend, SimdBackend};
use crate::tensor::{TensorView, TensorViewMut, normalize_axis};

/// User-facing operator parameters
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SoftmaxParam {
    /// Axis to normalize over; negative values count from the last dimension
    pub axis: isize,
    /// Softmax or log-softmax
    pub mode: SoftmaxMode,
}

impl Default for SoftmaxParam {
    fn default() -> Self {
        Self {
            axis: -1,
            mode: SoftmaxMode::Softmax,
        }
    }
}

impl SoftmaxParam {
    /// Softmax over `axis`
    pub fn softmax(axis: isize) -> Self {
        Self {
            axis,
            mode: SoftmaxMode::Softmax,
        }
    }

    /// Log-softmax over `axis`
    pub fn log_softmax(axis: isize) -> Self {
        Self {
            axis,
            mode: SoftmaxMode::LogSoftmax,
        }
    }
}

/// Immutable per-operator configuration
///
/// When the input rank is known up front ([`OpConfig::with_rank`]) the axis
/// is normalized once here; otherwise it is resolved on every call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpConfig {
    param: SoftmaxParam,
    rank: Option<usize>,
    normalized_axis: Option<usize>,
    variant: KernelVariant,
}

impl OpConfig {
    /// Configuration with the axis resolved at call time
    pub fn new(param: SoftmaxParam, pass: Pass) -> Self {
        Self {
            param,
            rank: None,
            normalized_axis: None,
            variant: KernelVariant {
                mode: param.mode,
                pass,
            },
        }
    }

    /// Configuration for inputs of a fixed rank, normalizing the axis now
    pub fn with_rank(param: SoftmaxParam, pass: Pass, rank: usize) -> Result<Self> {
        let axis = normalize_axis(param.axis, rank).ok_or(Error::InvalidDimension {
            dim: param.axis,
            ndim: rank,
        })?;
        Ok(Self {
            rank: Some(rank),
            normalized_axis: Some(axis),
            ..Self::new(param, pass)
        })
    }

    /// Parameters as given
    pub fn param(&self) -> SoftmaxParam {
        self.param
    }

    /// Axis as requested, possibly negative
    pub fn axis(&self) -> isize {
        self.param.axis
    }

    /// Axis normalized at construction, if the rank was known
    pub fn normalized_axis(&self) -> Option<usize> {
        self.normalized_axis
    }

    /// Normalization mode
    pub fn mode(&self) -> SoftmaxMode {
        self.variant.mode
    }

    /// Forward or backward
    pub fn pass(&self) -> Pass {
        self.variant.pass
    }

    /// Kernel variant
    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    /// Axis for an input of rank `ndim`
    pub fn resolve_axis(&self, ndim: usize) -> Result<usize> {
        match (self.rank, self.normalized_axis) {
            (Some(rank), Some(axis)) => {
                if rank != ndim {
                    return Err(Error::invalid_argument(
                        "input",
                        format!("operator configured for rank {rank}, got rank {ndim}"),
                    ));
                }
                Ok(axis)
            }
            _ => normalize_axis(self.param.axis, ndim).ok_or(Error::InvalidDimension {
                dim: self.param.axis,
                ndim,
            }),
        }
    }
}

/// Per-call execution context
#[derive(Debug)]
pub struct OpContext<'d, A: SoftmaxBackend = SimdBackend> {
    /// Training pass; forces the generic kernels
    pub is_train: bool,
    /// Dispatcher to run on
    pub dispatcher: &'d Dispatcher<A>,
}

impl<A: SoftmaxBackend> Clone for OpContext<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: SoftmaxBackend> Copy for OpContext<'_, A> {}

impl<'d, A: SoftmaxBackend> OpContext<'d, A> {
    /// Inference context
    pub fn inference(dispatcher: &'d Dispatcher<A>) -> Self {
        Self {
            is_train: false,
            dispatcher,
        }
    }

    /// Training context
    pub fn training(dispatcher: &'d Dispatcher<A>) -> Self {
        Self {
            is_train: true,
            dispatcher,
        }
    }
}

/// Which forward tensor the backward pass needs
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SavedTensor {
    /// The forward input
    Input,
    /// The forward output
    Output,
}

/// Gradient linkage advertised to the graph
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GradientSpec {
    /// Name of the operator computing the input gradient
    pub backward_op: &'static str,
    /// Forward tensor the backward operator takes as its second input
    pub saved: SavedTensor,
}

fn check_arity(op: &'static str, role: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::arity(op, role, expected, got));
    }
    Ok(())
}

/// Forward softmax / log-softmax operator
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SoftmaxOp {
    config: OpConfig,
}

impl SoftmaxOp {
    /// Number of inputs
    pub const NUM_INPUTS: usize = 1;
    /// Number of outputs
    pub const NUM_OUTPUTS: usize = 1;
    /// Input names
    pub const INPUT_NAMES: [&'static str; 1] = ["data"];
    /// Output names
    pub const OUTPUT_NAMES: [&'static str; 1] = ["output"];

    /// Operator with the axis resolved per call
    pub fn new(param: SoftmaxParam) -> Self {
        Self {
            config: OpConfig::new(param, Pass::Forward),
        }
    }

    /// Operator for inputs of a fixed rank
    pub fn with_rank(param: SoftmaxParam, rank: usize) -> Result<Self> {
        Ok(Self {
            config: OpConfig::with_rank(param, Pass::Forward, rank)?,
        })
    }

    /// Registered name
    pub fn name(&self) -> &'static str {
        self.config.variant().name()
    }

    /// Configuration
    pub fn config(&self) -> &OpConfig {
        &self.config
    }

    /// Gradient linkage: the backward op consumes the forward output
    pub fn gradient(&self) -> GradientSpec {
        GradientSpec {
            backward_op: self.config.mode().backward_name(),
            saved: SavedTensor::Output,
        }
    }

    /// Matching backward operator
    pub fn backward_op(&self) -> SoftmaxGradOp {
        SoftmaxGradOp {
            config: OpConfig {
                variant: KernelVariant {
                    mode: self.config.mode(),
                    pass: Pass::Backward,
                },
                ..self.config
            },
        }
    }

    /// Run the forward pass
    pub fn forward<T: Element, A: SoftmaxBackend>(
        &self,
        ctx: OpContext<'_, A>,
        inputs: &[TensorView<'_, T>],
        req: &[OpReq],
        outputs: &mut [TensorViewMut<'_, T>],
    ) -> Result<BackendDecision> {
        let op = self.name();
        check_arity(op, "inputs", Self::NUM_INPUTS, inputs.len())?;
        check_arity(op, "outputs", Self::NUM_OUTPUTS, outputs.len())?;
        check_arity(op, "req entries", Self::NUM_OUTPUTS, req.len())?;

        ctx.dispatcher
            .forward(&self.config, &inputs[0], req[0], &mut outputs[0], ctx.is_train)
    }
}

/// Backward softmax / log-softmax operator
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SoftmaxGradOp {
    config: OpConfig,
}

impl SoftmaxGradOp {
    /// Number of inputs
    pub const NUM_INPUTS: usize = 2;
    /// Number of outputs
    pub const NUM_OUTPUTS: usize = 1;
    /// Input names
    pub const INPUT_NAMES: [&'static str; 2] = ["ograd", "output"];
    /// Output names
    pub const OUTPUT_NAMES: [&'static str; 1] = ["igrad"];

    /// Operator with the axis resolved per call
    pub fn new(param: SoftmaxParam) -> Self {
        Self {
            config: OpConfig::new(param, Pass::Backward),
        }
    }

    /// Operator for inputs of a fixed rank
    pub fn with_rank(param: SoftmaxParam, rank: usize) -> Result<Self> {
        Ok(Self {
            config: OpConfig::with_rank(param, Pass::Backward, rank)?,
        })
    }

    /// Registered name
    pub fn name(&self) -> &'static str {
        self.config.variant().name()
    }

    /// Configuration
    pub fn config(&self) -> &OpConfig {
        &self.config
    }

    /// Run the backward pass; `inputs` is `[grad_output, saved_output]`
    pub fn backward<T: Element, A: SoftmaxBackend>(
        &self,
        ctx: OpContext<'_, A>,
        inputs: &[TensorView<'_, T>],
        req: &[OpReq],
        outputs: &mut [TensorViewMut<'_, T>],
    ) -> Result<BackendDecision> {
        let op = self.name();
        check_arity(op, "inputs", Self::NUM_INPUTS, inputs.len())?;
        check_arity(op, "outputs", Self::NUM_OUTPUTS, outputs.len())?;
        check_arity(op, "req entries", Self::NUM_OUTPUTS, req.len())?;

        ctx.dispatcher
            .backward(&self.config, &inputs[0], &inputs[1], req[0], &mut outputs[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{EngineConfig, GenericBackend};
    use crate::tensor::Tensor;

    fn generic() -> Dispatcher<GenericBackend> {
        Dispatcher::with_backend(GenericBackend, EngineConfig::default())
    }

    #[test]
    fn test_with_rank_normalizes() {
        let cfg = OpConfig::with_rank(SoftmaxParam::softmax(-1), Pass::Forward, 3).unwrap();
        assert_eq!(cfg.axis(), -1);
        assert_eq!(cfg.normalized_axis(), Some(2));
        assert_eq!(cfg.resolve_axis(3).unwrap(), 2);
        assert_eq!(
            cfg.resolve_axis(2).unwrap_err().kind(),
            ErrorKind::Other,
        );

        let err = OpConfig::with_rank(SoftmaxParam::softmax(3), Pass::Forward, 3).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { dim: 3, ndim: 3 }));
    }

    #[test]
    fn test_resolve_axis_late() {
        let cfg = OpConfig::new(SoftmaxParam::default(), Pass::Forward);
        assert_eq!(cfg.normalized_axis(), None);
        assert_eq!(cfg.resolve_axis(1).unwrap(), 0);
        assert_eq!(cfg.resolve_axis(4).unwrap(), 3);
        assert!(cfg.resolve_axis(0).is_err());
    }

    #[test]
    fn test_names_and_gradient() {
        let op = SoftmaxOp::new(SoftmaxParam::log_softmax(1));
        assert_eq!(op.name(), "log_softmax");
        let grad = op.gradient();
        assert_eq!(grad.backward_op, "_backward_log_softmax");
        assert_eq!(grad.saved, SavedTensor::Output);

        let bwd = op.backward_op();
        assert_eq!(bwd.name(), grad.backward_op);
        assert_eq!(bwd.config().axis(), 1);
        assert_eq!(bwd.config().pass(), Pass::Backward);
    }

    #[test]
    fn test_forward_arity() {
        let d = generic();
        let op = SoftmaxOp::new(SoftmaxParam::default());
        let x = Tensor::from_slice(&[1.0f32, 2.0], &[2]).unwrap();
        let mut y = Tensor::<f32>::zeros(&[2]);

        let err = op
            .forward(OpContext::inference(&d), &[x.view(), x.view()], &[OpReq::WriteTo], &mut [y.view_mut()])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Arity { role: "inputs", expected: 1, got: 2, .. }
        ));

        let err = op
            .forward(OpContext::inference(&d), &[x.view()], &[], &mut [y.view_mut()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arity);

        let err = op
            .forward::<f32, _>(OpContext::inference(&d), &[x.view()], &[OpReq::WriteTo], &mut [])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arity);
        assert_eq!(y.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_backward_arity() {
        let d = generic();
        let op = SoftmaxGradOp::new(SoftmaxParam::default());
        let y = Tensor::from_slice(&[0.5f64, 0.5], &[2]).unwrap();
        let mut dx = Tensor::<f64>::zeros(&[2]);
        let err = op
            .backward(OpContext::training(&d), &[y.view()], &[OpReq::WriteTo], &mut [dx.view_mut()])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Arity { op: "_backward_softmax", expected: 2, got: 1, .. }
        ));
    }
}
