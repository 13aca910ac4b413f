//! Generic softmax and log-softmax kernels
//!
//! Every kernel works on one lane (batch slice) at a time: the elements that
//! share all non-axis indices. Input and output views may use different
//! strides; lanes are numbered the same way in both because their shapes are
//! equal.
//!
//! ```text
//! softmax_forward       y = exp(x - max) / sum(exp(x - max))
//! log_softmax_forward   y = x - max - ln(sum(exp(x - max)))
//! softmax_backward      dx = y * (dy - sum(dy * y))
//! log_softmax_backward  dx = dy - exp(y) * sum(dy)
//! ```
//!
//! With the `rayon` feature, lanes are processed in parallel once their count
//! reaches [`KernelOptions::parallel_min_lanes`].

use super::reduce::{Lane, lane_dot, lane_stats, lane_sum};
use super::{OpReq, SoftmaxMode};
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::tensor::{AxisLanes, TensorView, TensorViewMut};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Backend name reported in layout errors raised by these kernels
pub(crate) const GENERIC: &str = "generic";

/// Default lane count at which the lane loop goes parallel
pub const DEFAULT_PARALLEL_MIN_LANES: usize = 64;

/// Tuning knobs for the generic kernels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelOptions {
    /// Minimum number of lanes before work is split across threads
    pub parallel_min_lanes: usize,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            parallel_min_lanes: DEFAULT_PARALLEL_MIN_LANES,
        }
    }
}

/// Softmax along `axis`
///
/// # Example
///
/// ```
/// use stablemax::ops::{OpReq, softmax_forward};
/// use stablemax::tensor::{TensorView, TensorViewMut};
///
/// let x = [1.0f32, 1.0, 1.0, 1.0, 1.0, 1.0];
/// let mut y = [0.0f32; 6];
/// softmax_forward(
///     &TensorView::from_slice(&x, &[2, 3])?,
///     0,
///     OpReq::WriteTo,
///     &mut TensorViewMut::from_slice(&mut y, &[2, 3])?,
/// )?;
/// assert!(y.iter().all(|&v| (v - 0.5).abs() < 1e-7));
/// # Ok::<(), stablemax::error::Error>(())
/// ```
pub fn softmax_forward<T: Element>(
    x: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    y: &mut TensorViewMut<'_, T>,
) -> Result<()> {
    forward(SoftmaxMode::Softmax, x, axis, req, y, &KernelOptions::default())
}

/// Log-softmax along `axis`
pub fn log_softmax_forward<T: Element>(
    x: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    y: &mut TensorViewMut<'_, T>,
) -> Result<()> {
    forward(SoftmaxMode::LogSoftmax, x, axis, req, y, &KernelOptions::default())
}

/// Softmax gradient from the output gradient `dy` and the saved output `y`
pub fn softmax_backward<T: Element>(
    dy: &TensorView<'_, T>,
    y: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    dx: &mut TensorViewMut<'_, T>,
) -> Result<()> {
    backward(SoftmaxMode::Softmax, dy, y, axis, req, dx, &KernelOptions::default())
}

/// Log-softmax gradient from the output gradient `dy` and the saved output `y`
pub fn log_softmax_backward<T: Element>(
    dy: &TensorView<'_, T>,
    y: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    dx: &mut TensorViewMut<'_, T>,
) -> Result<()> {
    backward(SoftmaxMode::LogSoftmax, dy, y, axis, req, dx, &KernelOptions::default())
}

fn check_shape(expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(Error::shape_mismatch(expected, got));
    }
    Ok(())
}

fn check_dense<T: Element>(v: &TensorView<'_, T>, role: &str) -> Result<()> {
    if !v.format().is_dense() {
        return Err(Error::layout(
            GENERIC,
            format!("{role} is in {} format; convert to dense first", v.format()),
        ));
    }
    Ok(())
}

fn check_output<T: Element>(out: &TensorViewMut<'_, T>) -> Result<()> {
    if out.layout().has_internal_overlap() {
        return Err(Error::layout(
            GENERIC,
            format!("output layout {:?} aliases elements", out.layout()),
        ));
    }
    Ok(())
}

fn resolve_axis(axis: isize, ndim: usize) -> Result<usize> {
    crate::tensor::normalize_axis(axis, ndim).ok_or(Error::InvalidDimension { dim: axis, ndim })
}

/// Forward kernel for either mode
///
/// All checks happen before the first write; `OpReq::Null` returns at once.
pub fn forward<T: Element>(
    mode: SoftmaxMode,
    x: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    y: &mut TensorViewMut<'_, T>,
    opts: &KernelOptions,
) -> Result<()> {
    if req == OpReq::Null {
        return Ok(());
    }
    check_shape(x.shape(), y.shape())?;
    let ax = resolve_axis(axis, x.ndim())?;
    check_dense(x, "input")?;
    check_output(y)?;

    let x_lanes = x.layout().lanes(ax);
    let y_lanes = y.layout().lanes(ax);
    let x_addr = x.as_ptr() as usize;
    let y_addr = y.as_mut_ptr() as usize;

    for_each_lane(x_lanes.count(), opts, |l| {
        // SAFETY: views were bounds-checked at construction, the output has no
        // internal overlap, and each lane index is visited exactly once.
        unsafe { forward_lane::<T>(mode, x_addr, &x_lanes, y_addr, &y_lanes, l, req) }
    });
    Ok(())
}

/// Backward kernel for either mode
///
/// `dy` is the gradient of the forward output, `y` the saved forward output.
pub fn backward<T: Element>(
    mode: SoftmaxMode,
    dy: &TensorView<'_, T>,
    y: &TensorView<'_, T>,
    axis: isize,
    req: OpReq,
    dx: &mut TensorViewMut<'_, T>,
    opts: &KernelOptions,
) -> Result<()> {
    if req == OpReq::Null {
        return Ok(());
    }
    check_shape(y.shape(), dy.shape())?;
    check_shape(y.shape(), dx.shape())?;
    let ax = resolve_axis(axis, y.ndim())?;
    check_dense(dy, "output gradient")?;
    check_dense(y, "saved output")?;
    check_output(dx)?;

    let dy_lanes = dy.layout().lanes(ax);
    let y_lanes = y.layout().lanes(ax);
    let dx_lanes = dx.layout().lanes(ax);
    let dy_addr = dy.as_ptr() as usize;
    let y_addr = y.as_ptr() as usize;
    let dx_addr = dx.as_mut_ptr() as usize;

    for_each_lane(y_lanes.count(), opts, |l| {
        // SAFETY: as in `forward`
        unsafe {
            let g = Lane::new(dy_addr as *const T, dy_lanes.base(l), dy_lanes.axis_stride(), dy_lanes.axis_len());
            let o = Lane::new(y_addr as *const T, y_lanes.base(l), y_lanes.axis_stride(), y_lanes.axis_len());
            let out = dx_addr as *mut T;
            let base = dx_lanes.base(l);
            let stride = dx_lanes.axis_stride();

            match mode {
                SoftmaxMode::Softmax => {
                    let dot = lane_dot(&g, &o);
                    for k in 0..o.len() {
                        let p = out.offset(base + k as isize * stride);
                        *p = req.combine(*p, o.get(k) * (g.get(k) - dot));
                    }
                }
                SoftmaxMode::LogSoftmax => {
                    let sum = lane_sum(&g);
                    for k in 0..o.len() {
                        let p = out.offset(base + k as isize * stride);
                        *p = req.combine(*p, g.get(k) - o.get(k).exp() * sum);
                    }
                }
            }
        }
    });
    Ok(())
}

/// # Safety
/// `x_addr`/`y_addr` must address buffers covering every lane element, and no
/// other thread may write lane `l` of the output concurrently.
#[inline]
unsafe fn forward_lane<T: Element>(
    mode: SoftmaxMode,
    x_addr: usize,
    x_lanes: &AxisLanes,
    y_addr: usize,
    y_lanes: &AxisLanes,
    l: usize,
    req: OpReq,
) {
    let lane = unsafe {
        Lane::new(x_addr as *const T, x_lanes.base(l), x_lanes.axis_stride(), x_lanes.axis_len())
    };
    let out = y_addr as *mut T;
    let base = y_lanes.base(l);
    let stride = y_lanes.axis_stride();

    let (max_val, sum) = lane_stats(&lane);
    match mode {
        SoftmaxMode::Softmax => {
            for k in 0..lane.len() {
                let v = (lane.get(k) - max_val).exp() / sum;
                unsafe {
                    let p = out.offset(base + k as isize * stride);
                    *p = req.combine(*p, v);
                }
            }
        }
        SoftmaxMode::LogSoftmax => {
            let log_sum = sum.ln();
            for k in 0..lane.len() {
                let v = lane.get(k) - max_val - log_sum;
                unsafe {
                    let p = out.offset(base + k as isize * stride);
                    *p = req.combine(*p, v);
                }
            }
        }
    }
}

/// Run `f` for every lane index, in parallel when worthwhile
fn for_each_lane<F>(count: usize, opts: &KernelOptions, f: F)
where
    F: Fn(usize) + Send + Sync,
{
    #[cfg(feature = "rayon")]
    if count >= opts.parallel_min_lanes.max(2) {
        (0..count).into_par_iter().with_min_len(16).for_each(f);
        return;
    }

    #[cfg(not(feature = "rayon"))]
    let _ = opts;

    (0..count).for_each(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Layout, Tensor};

    fn softmax_ref(row: &[f64]) -> Vec<f64> {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = row.iter().map(|v| (v - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        exps.iter().map(|e| e / sum).collect()
    }

    #[test]
    fn test_softmax_rows() {
        let x = [1.0f64, 2.0, 3.0, -1.0, 0.0, 1.0];
        let mut y = [0.0f64; 6];
        softmax_forward(
            &TensorView::from_slice(&x, &[2, 3]).unwrap(),
            -1,
            OpReq::WriteTo,
            &mut TensorViewMut::from_slice(&mut y, &[2, 3]).unwrap(),
        )
        .unwrap();
        let r0 = softmax_ref(&x[..3]);
        let r1 = softmax_ref(&x[3..]);
        for k in 0..3 {
            assert!((y[k] - r0[k]).abs() < 1e-12);
            assert!((y[3 + k] - r1[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_log_softmax_matches_log_of_softmax() {
        let x = [0.5f64, -2.0, 3.25, 0.0];
        let mut y = [0.0f64; 4];
        log_softmax_forward(
            &TensorView::from_slice(&x, &[4]).unwrap(),
            0,
            OpReq::WriteTo,
            &mut TensorViewMut::from_slice(&mut y, &[4]).unwrap(),
        )
        .unwrap();
        for (a, b) in y.iter().zip(softmax_ref(&x)) {
            assert!((a - b.ln()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_req_add_and_null() {
        let x = [0.0f32, 0.0];
        let mut y = [1.0f32, 2.0];
        let xv = TensorView::from_slice(&x, &[2]).unwrap();

        softmax_forward(&xv, 0, OpReq::AddTo, &mut TensorViewMut::from_slice(&mut y, &[2]).unwrap())
            .unwrap();
        assert_eq!(y, [1.5, 2.5]);

        softmax_forward(&xv, 0, OpReq::Null, &mut TensorViewMut::from_slice(&mut y, &[2]).unwrap())
            .unwrap();
        assert_eq!(y, [1.5, 2.5]);
    }

    #[test]
    fn test_strided_output() {
        // write into the transposed view of a 3x2 buffer
        let x = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut buf = [0.0f64; 6];
        let layout = Layout::contiguous(&[3, 2]).transpose(0, 1).unwrap();
        let mut y = TensorViewMut::new(&mut buf, layout).unwrap();
        softmax_forward(&TensorView::from_slice(&x, &[2, 3]).unwrap(), 1, OpReq::WriteTo, &mut y)
            .unwrap();
        let out = y.to_vec();
        let r0 = softmax_ref(&x[..3]);
        for k in 0..3 {
            assert!((out[k] - r0[k]).abs() < 1e-12);
        }
        // buf is column-major relative to the logical [2, 3]
        assert!((buf[2] - r0[1]).abs() < 1e-12);
    }

    #[test]
    fn test_validation_before_write() {
        let x = [1.0f32; 6];
        let xv = TensorView::from_slice(&x, &[2, 3]).unwrap();

        let mut y = [7.0f32; 6];
        let err = softmax_forward(&xv, 2, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut y, &[2, 3]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { dim: 2, ndim: 2 }));
        assert_eq!(y, [7.0; 6]);

        let err = softmax_forward(&xv, 0, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut y, &[3, 2]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(y, [7.0; 6]);

        // broadcast output aliases every row onto one
        let mut small = [7.0f32; 3];
        let layout = Layout::from_parts(&[2, 3], &[0, 1], 0);
        let err = softmax_forward(&xv, 1, OpReq::WriteTo, &mut TensorViewMut::new(&mut small, layout).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::LayoutRejected { .. }));
        assert_eq!(small, [7.0; 3]);
    }

    #[test]
    fn test_padded_input_rejected() {
        let t = Tensor::from_slice(&[1.0f32, 2.0, 3.0], &[1, 3]).unwrap();
        let p = Tensor::padded_from(&t.view(), 8).unwrap();
        let mut y = [0.0f32; 3];
        let err = softmax_forward(&p.view(), 1, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut y, &[1, 3]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::LayoutRejected { backend: "generic", .. }));
    }

    #[test]
    fn test_backward_formulas() {
        let y = [0.2f64, 0.3, 0.5];
        let dy = [1.0f64, -1.0, 0.5];
        let mut dx = [0.0f64; 3];
        softmax_backward(
            &TensorView::from_slice(&dy, &[3]).unwrap(),
            &TensorView::from_slice(&y, &[3]).unwrap(),
            0,
            OpReq::WriteTo,
            &mut TensorViewMut::from_slice(&mut dx, &[3]).unwrap(),
        )
        .unwrap();
        let dot = 0.2 - 0.3 + 0.25;
        for k in 0..3 {
            assert!((dx[k] - y[k] * (dy[k] - dot)).abs() < 1e-12);
        }

        let ly: Vec<f64> = y.iter().map(|v| v.ln()).collect();
        log_softmax_backward(
            &TensorView::from_slice(&dy, &[3]).unwrap(),
            &TensorView::from_slice(&ly, &[3]).unwrap(),
            0,
            OpReq::WriteTo,
            &mut TensorViewMut::from_slice(&mut dx, &[3]).unwrap(),
        )
        .unwrap();
        for k in 0..3 {
            assert!((dx[k] - (dy[k] - y[k] * 0.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parallel_matches_serial() {
        let n = 300;
        let x: Vec<f32> = (0..n * 7).map(|i| ((i * 37 % 101) as f32) * 0.1 - 5.0).collect();
        let xv = TensorView::from_slice(&x, &[n, 7]).unwrap();
        let mut a = vec![0.0f32; n * 7];
        let mut b = vec![0.0f32; n * 7];
        let serial = KernelOptions {
            parallel_min_lanes: usize::MAX,
        };
        let parallel = KernelOptions {
            parallel_min_lanes: 1,
        };
        forward(SoftmaxMode::LogSoftmax, &xv, 1, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut a, &[n, 7]).unwrap(), &serial).unwrap();
        forward(SoftmaxMode::LogSoftmax, &xv, 1, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut b, &[n, 7]).unwrap(), &parallel).unwrap();
        assert_eq!(a, b);
    }
}
