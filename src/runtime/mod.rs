//! Compute backends and per-call dispatch
//!
//! ```text
//! Dispatcher (per-call backend choice)
//! ├── SimdBackend     AVX2+FMA row kernels, inference only
//! └── GenericBackend  portable kernels, every dtype / axis / dense layout
//! ```
//!
//! Backends implement [`SoftmaxBackend`]. The [`Dispatcher`] asks the
//! accelerated backend first and falls back to the generic kernels whenever
//! the call is a training pass or the backend declines the layout.

mod backend;
pub mod config;
mod dispatch;
mod generic;
pub mod simd;

pub use backend::{BackendDecision, SoftmaxBackend};
pub use config::{BackendPreference, EngineConfig, NegativeAxisPolicy};
pub use dispatch::Dispatcher;
pub use generic::GenericBackend;
pub use simd::{SimdBackend, SimdLevel, detect_simd};
