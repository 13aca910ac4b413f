//! Engine configuration
//!
//! [`EngineConfig`] collects the knobs that steer backend selection and the
//! generic kernels. It can be built in code or read from the environment:
//!
//! | Variable                        | Values                  | Default     |
//! |---------------------------------|-------------------------|-------------|
//! | `STABLEMAX_BACKEND`             | `auto`, `generic`       | `auto`      |
//! | `STABLEMAX_VERIFY`              | `0`, `1`                | `0`         |
//! | `STABLEMAX_PARALLEL_MIN_LANES`  | non-negative integer    | `64`        |
//! | `STABLEMAX_NEGATIVE_AXIS`       | `normalize`, `reject`   | `normalize` |
//!
//! Unknown values are logged with `log::warn!` and replaced by the default.

use crate::ops::softmax::{DEFAULT_PARALLEL_MIN_LANES, KernelOptions};
use std::env;
use std::sync::OnceLock;

/// Backend selection variable
pub const BACKEND_ENV: &str = "STABLEMAX_BACKEND";
/// Verification toggle variable
pub const VERIFY_ENV: &str = "STABLEMAX_VERIFY";
/// Parallel threshold variable
pub const PARALLEL_MIN_LANES_ENV: &str = "STABLEMAX_PARALLEL_MIN_LANES";
/// Negative axis policy variable
pub const NEGATIVE_AXIS_ENV: &str = "STABLEMAX_NEGATIVE_AXIS";

/// Default tolerance for verification mode
pub const DEFAULT_VERIFY_TOLERANCE: f64 = 1e-4;

/// Which backends the dispatcher may consider
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    /// Use the accelerated backend whenever it accepts the call
    #[default]
    Auto,
    /// Always use the generic kernels
    Generic,
}

impl BackendPreference {
    fn forces_generic(self) -> bool {
        matches!(self, Self::Generic)
    }
}

/// How a negative configured axis interacts with the accelerated path
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NegativeAxisPolicy {
    /// Normalize first, then ask the accelerated backend
    #[default]
    Normalize,
    /// A negative configured axis always routes to the generic kernels
    RejectAccelerated,
}

/// Dispatcher and kernel settings
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Backend preference
    pub preference: BackendPreference,
    /// Negative axis policy
    pub negative_axis: NegativeAxisPolicy,
    /// Cross-check every accelerated forward against the generic kernel
    pub verify_accelerated: bool,
    /// Largest allowed `|accelerated - generic| / max(1, |generic|)`
    pub verify_tolerance: f64,
    /// Lane count at which the generic kernels go parallel
    pub parallel_min_lanes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preference: BackendPreference::Auto,
            negative_axis: NegativeAxisPolicy::Normalize,
            verify_accelerated: false,
            verify_tolerance: DEFAULT_VERIFY_TOLERANCE,
            parallel_min_lanes: DEFAULT_PARALLEL_MIN_LANES,
        }
    }
}

static GLOBAL_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

impl EngineConfig {
    /// Configuration read from the environment once per process
    pub fn global() -> &'static EngineConfig {
        GLOBAL_CONFIG.get_or_init(Self::from_env)
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(BACKEND_ENV) {
            config.preference = match raw.trim().to_lowercase().as_str() {
                "auto" | "" | "default" => BackendPreference::Auto,
                "generic" | "scalar" | "fallback" => BackendPreference::Generic,
                other => {
                    log::warn!("Unknown {BACKEND_ENV} value '{other}', falling back to auto");
                    BackendPreference::Auto
                }
            };
        }

        if let Some(raw) = lookup(VERIFY_ENV) {
            config.verify_accelerated = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    log::warn!("Unknown {VERIFY_ENV} value '{other}', verification disabled");
                    false
                }
            };
        }

        if let Some(raw) = lookup(PARALLEL_MIN_LANES_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.parallel_min_lanes = n,
                Err(e) => log::warn!(
                    "Invalid {PARALLEL_MIN_LANES_ENV} value '{raw}' ({e}), using {DEFAULT_PARALLEL_MIN_LANES}"
                ),
            }
        }

        if let Some(raw) = lookup(NEGATIVE_AXIS_ENV) {
            config.negative_axis = match raw.trim().to_lowercase().as_str() {
                "normalize" | "" => NegativeAxisPolicy::Normalize,
                "reject" => NegativeAxisPolicy::RejectAccelerated,
                other => {
                    log::warn!("Unknown {NEGATIVE_AXIS_ENV} value '{other}', falling back to normalize");
                    NegativeAxisPolicy::Normalize
                }
            };
        }

        config
    }

    /// Set the backend preference
    pub fn with_preference(mut self, preference: BackendPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Set the negative axis policy
    pub fn with_negative_axis(mut self, policy: NegativeAxisPolicy) -> Self {
        self.negative_axis = policy;
        self
    }

    /// Enable verification with the given tolerance
    pub fn with_verification(mut self, tolerance: f64) -> Self {
        self.verify_accelerated = true;
        self.verify_tolerance = tolerance;
        self
    }

    /// Set the parallel lane threshold
    pub fn with_parallel_min_lanes(mut self, lanes: usize) -> Self {
        self.parallel_min_lanes = lanes;
        self
    }

    /// Whether the accelerated backend may be considered at all
    pub fn allows_accelerated(&self) -> bool {
        !self.preference.forces_generic()
    }

    /// Options handed to the generic kernels
    pub fn kernel_options(&self) -> KernelOptions {
        KernelOptions {
            parallel_min_lanes: self.parallel_min_lanes,
        }
    }
}
