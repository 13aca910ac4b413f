//! Stabilized reductions along one axis
//!
//! All accumulation happens in `f64` regardless of the element type, and the
//! exponential sums are always taken relative to the lane maximum so that no
//! intermediate can overflow.

use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorView};

/// Reduction kinds supported by [`reduce`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    /// `max(x)`, `-inf` for an empty lane
    Max,
    /// `sum(x)`
    Sum,
    /// `sum(exp(x - max(x)))`, always in `[1, len]` for finite input
    SumExp,
    /// `max(x) + ln(sum(exp(x - max(x))))`
    LogSumExp,
}

/// One strided 1-D slice of a buffer
///
/// Element `k` lives at `ptr + base + k * stride`.
#[derive(Copy, Clone)]
pub(crate) struct Lane<T> {
    ptr: *const T,
    base: isize,
    stride: isize,
    len: usize,
}

impl<T: Element> Lane<T> {
    /// # Safety
    /// `ptr.offset(base + k * stride)` must be a valid read for every `k < len`.
    #[inline]
    pub(crate) unsafe fn new(ptr: *const T, base: isize, stride: isize, len: usize) -> Self {
        Self {
            ptr,
            base,
            stride,
            len,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn get(&self, k: usize) -> f64 {
        debug_assert!(k < self.len);
        // SAFETY: guaranteed by the constructor contract
        unsafe { (*self.ptr.offset(self.base + k as isize * self.stride)).to_f64() }
    }
}

/// Maximum of a lane, `-inf` when empty
#[inline]
pub(crate) fn lane_max<T: Element>(lane: &Lane<T>) -> f64 {
    let mut max_val = f64::NEG_INFINITY;
    for k in 0..lane.len() {
        let v = lane.get(k);
        if v > max_val || v.is_nan() {
            max_val = v;
        }
    }
    max_val
}

/// Lane maximum and `sum(exp(x - max))`
#[inline]
pub(crate) fn lane_stats<T: Element>(lane: &Lane<T>) -> (f64, f64) {
    let max_val = lane_max(lane);
    let mut sum = 0.0f64;
    for k in 0..lane.len() {
        sum += (lane.get(k) - max_val).exp();
    }
    (max_val, sum)
}

/// Plain sum of a lane
#[inline]
pub(crate) fn lane_sum<T: Element>(lane: &Lane<T>) -> f64 {
    (0..lane.len()).map(|k| lane.get(k)).sum()
}

/// Inner product of two lanes of equal length
#[inline]
pub(crate) fn lane_dot<T: Element>(a: &Lane<T>, b: &Lane<T>) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    (0..a.len()).map(|k| a.get(k) * b.get(k)).sum()
}

/// Reduce `x` along `axis`, keeping the axis with size 1
///
/// Negative axes count from the last dimension.
///
/// # Example
///
/// ```
/// use stablemax::ops::{ReduceKind, reduce};
/// use stablemax::tensor::TensorView;
///
/// let data = [1.0f64, 2.0, 3.0, 4.0];
/// let x = TensorView::from_slice(&data, &[2, 2])?;
/// let m = reduce(&x, 0, ReduceKind::Max)?;
/// assert_eq!(m.shape(), &[1, 2]);
/// assert_eq!(m.to_vec(), vec![3.0, 4.0]);
/// # Ok::<(), stablemax::error::Error>(())
/// ```
pub fn reduce<T: Element>(x: &TensorView<'_, T>, axis: isize, kind: ReduceKind) -> Result<Tensor<T>> {
    let ax = x
        .layout()
        .normalize_dim(axis)
        .ok_or(Error::InvalidDimension {
            dim: axis,
            ndim: x.ndim(),
        })?;

    let mut out_shape = x.shape().to_vec();
    out_shape[ax] = 1;

    let lanes = x.layout().lanes(ax);
    let mut out = Vec::with_capacity(lanes.count());
    for l in 0..lanes.count() {
        // SAFETY: view construction checked every addressable element
        let lane = unsafe { Lane::new(x.as_ptr(), lanes.base(l), lanes.axis_stride(), lanes.axis_len()) };
        let value = match kind {
            ReduceKind::Max => lane_max(&lane),
            ReduceKind::Sum => lane_sum(&lane),
            ReduceKind::SumExp => lane_stats(&lane).1,
            ReduceKind::LogSumExp => {
                let (max_val, sum) = lane_stats(&lane);
                max_val + sum.ln()
            }
        };
        out.push(T::from_f64(value));
    }

    Tensor::from_vec(out, &out_shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_kinds() {
        let data = [1.0f64, 2.0, 3.0, 1.0, 1.0, 1.0];
        let x = TensorView::from_slice(&data, &[2, 3]).unwrap();

        assert_eq!(reduce(&x, -1, ReduceKind::Max).unwrap().to_vec(), vec![3.0, 1.0]);
        assert_eq!(reduce(&x, 1, ReduceKind::Sum).unwrap().to_vec(), vec![6.0, 3.0]);

        let se = reduce(&x, 1, ReduceKind::SumExp).unwrap().to_vec();
        let expected = (-2.0f64).exp() + (-1.0f64).exp() + 1.0;
        assert!((se[0] - expected).abs() < 1e-12);
        assert!((se[1] - 3.0).abs() < 1e-12);

        let lse = reduce(&x, 1, ReduceKind::LogSumExp).unwrap().to_vec();
        assert!((lse[0] - (3.0 + expected.ln())).abs() < 1e-12);
        assert!((lse[1] - (1.0 + 3.0f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_axis0_shape() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let x = TensorView::from_slice(&data, &[2, 3, 4]).unwrap();
        let m = reduce(&x, 0, ReduceKind::Max).unwrap();
        assert_eq!(m.shape(), &[1, 3, 4]);
        assert_eq!(m.to_vec(), (12..24).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_log_sum_exp_no_overflow() {
        let data = [1000.0f32, 1000.0];
        let x = TensorView::from_slice(&data, &[2]).unwrap();
        let lse = reduce(&x, 0, ReduceKind::LogSumExp).unwrap().to_vec();
        assert!((lse[0] - (1000.0 + 2.0f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn test_reduce_empty_axis() {
        let data: [f64; 0] = [];
        let x = TensorView::from_slice(&data, &[2, 0]).unwrap();
        let m = reduce(&x, 1, ReduceKind::Max).unwrap();
        assert_eq!(m.to_vec(), vec![f64::NEG_INFINITY; 2]);
        let s = reduce(&x, 1, ReduceKind::SumExp).unwrap();
        assert_eq!(s.to_vec(), vec![0.0; 2]);
    }

    #[test]
    fn test_reduce_bad_axis() {
        let data = [1.0f32; 4];
        let x = TensorView::from_slice(&data, &[2, 2]).unwrap();
        let err = reduce(&x, 2, ReduceKind::Max).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { dim: 2, ndim: 2 }));
    }
}
