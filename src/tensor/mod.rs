//! Tensor types
//!
//! This module provides the owned [`Tensor`] type and the borrowed
//! [`TensorView`] / [`TensorViewMut`] handles the kernels operate on, together
//! with the [`Layout`] and [`MemoryFormat`] descriptors that describe how
//! elements sit in memory.

mod core;
mod format;
mod layout;
mod shape;
mod strides;
mod view;

pub use core::Tensor;
pub use format::MemoryFormat;
pub use layout::{AxisLanes, Layout, OffsetIter, normalize_axis};
pub use shape::Shape;
pub use strides::Strides;
pub use view::{TensorView, TensorViewMut};
