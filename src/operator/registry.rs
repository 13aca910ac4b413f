//! Name-to-operator registry
//!
//! Maps the four operator names to factories taking the configured axis.
//! The mode is implied by the name.

use super::{OpContext, SoftmaxGradOp, SoftmaxOp, SoftmaxParam};
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::ops::{OpReq, SoftmaxMode};
use crate::runtime::{BackendDecision, SoftmaxBackend};
use crate::tensor::{TensorView, TensorViewMut};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A constructed operator of either direction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    /// Forward softmax / log-softmax
    Forward(SoftmaxOp),
    /// Backward softmax / log-softmax
    Backward(SoftmaxGradOp),
}

impl Operator {
    /// Registered name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward(op) => op.name(),
            Self::Backward(op) => op.name(),
        }
    }

    /// Number of inputs
    pub fn num_inputs(&self) -> usize {
        match self {
            Self::Forward(_) => SoftmaxOp::NUM_INPUTS,
            Self::Backward(_) => SoftmaxGradOp::NUM_INPUTS,
        }
    }

    /// Number of outputs
    pub fn num_outputs(&self) -> usize {
        match self {
            Self::Forward(_) => SoftmaxOp::NUM_OUTPUTS,
            Self::Backward(_) => SoftmaxGradOp::NUM_OUTPUTS,
        }
    }

    /// Input names
    pub fn input_names(&self) -> &'static [&'static str] {
        match self {
            Self::Forward(_) => &SoftmaxOp::INPUT_NAMES,
            Self::Backward(_) => &SoftmaxGradOp::INPUT_NAMES,
        }
    }

    /// Output names
    pub fn output_names(&self) -> &'static [&'static str] {
        match self {
            Self::Forward(_) => &SoftmaxOp::OUTPUT_NAMES,
            Self::Backward(_) => &SoftmaxGradOp::OUTPUT_NAMES,
        }
    }

    /// Run the operator in its direction
    pub fn run<T: Element, A: SoftmaxBackend>(
        &self,
        ctx: OpContext<'_, A>,
        inputs: &[TensorView<'_, T>],
        req: &[OpReq],
        outputs: &mut [TensorViewMut<'_, T>],
    ) -> Result<BackendDecision> {
        match self {
            Self::Forward(op) => op.forward(ctx, inputs, req, outputs),
            Self::Backward(op) => op.backward(ctx, inputs, req, outputs),
        }
    }
}

/// Builds an operator from the configured axis
pub type OpFactory = fn(isize) -> Operator;

fn softmax_factory(axis: isize) -> Operator {
    Operator::Forward(SoftmaxOp::new(SoftmaxParam::softmax(axis)))
}

fn log_softmax_factory(axis: isize) -> Operator {
    Operator::Forward(SoftmaxOp::new(SoftmaxParam::log_softmax(axis)))
}

fn softmax_grad_factory(axis: isize) -> Operator {
    Operator::Backward(SoftmaxGradOp::new(SoftmaxParam::softmax(axis)))
}

fn log_softmax_grad_factory(axis: isize) -> Operator {
    Operator::Backward(SoftmaxGradOp::new(SoftmaxParam::log_softmax(axis)))
}

/// Operator name registry
#[derive(Clone, Debug, Default)]
pub struct OpRegistry {
    factories: HashMap<&'static str, OpFactory>,
}

static GLOBAL_REGISTRY: OnceLock<OpRegistry> = OnceLock::new();

impl OpRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four softmax operators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SoftmaxMode::Softmax.forward_name(), softmax_factory);
        registry.register(SoftmaxMode::LogSoftmax.forward_name(), log_softmax_factory);
        registry.register(SoftmaxMode::Softmax.backward_name(), softmax_grad_factory);
        registry.register(
            SoftmaxMode::LogSoftmax.backward_name(),
            log_softmax_grad_factory,
        );
        registry
    }

    /// Process-wide registry with the default operators
    pub fn global() -> &'static OpRegistry {
        GLOBAL_REGISTRY.get_or_init(Self::with_defaults)
    }

    /// Register a factory, returning the one it replaced
    pub fn register(&mut self, name: &'static str, factory: OpFactory) -> Option<OpFactory> {
        let previous = self.factories.insert(name, factory);
        if previous.is_some() {
            log::debug!("operator '{name}' re-registered");
        }
        previous
    }

    /// Factory registered under `name`
    pub fn get(&self, name: &str) -> Option<OpFactory> {
        self.factories.get(name).copied()
    }

    /// Build the operator registered under `name`
    pub fn create(&self, name: &str, axis: isize) -> Result<Operator> {
        self.get(name)
            .map(|factory| factory(axis))
            .ok_or_else(|| Error::UnknownOperator(name.to_string()))
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
