//! SIMD-accelerated softmax backend
//!
//! Runtime CPU feature detection plus AVX2+FMA row kernels for `f32` and
//! `f64`. The backend accepts any axis of a view whose last dimension is
//! unit-stride: rows along the last axis are read in place, rows along any
//! other axis are gathered into a scratch buffer first.
//!
//! # Architecture Support
//!
//! | Architecture | Instruction Set | Vector Width | Status      |
//! |--------------|-----------------|--------------|-------------|
//! | x86-64       | AVX2 + FMA      | 256 bits     | Supported   |
//! | Any          | none            | N/A          | Unavailable |
//!
//! When the CPU lacks AVX2+FMA, or the `simd` feature is disabled, the backend
//! reports itself unavailable and the dispatcher never selects it.

#[cfg(target_arch = "x86_64")]
mod avx2;
#[cfg(target_arch = "x86_64")]
mod math;

use super::backend::SoftmaxBackend;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::ops::softmax::KernelOptions;
use crate::ops::{OpReq, SoftmaxMode};
use crate::tensor::{TensorView, TensorViewMut};
use std::sync::OnceLock;

#[cfg(target_arch = "x86_64")]
use crate::tensor::AxisLanes;

#[cfg(all(target_arch = "x86_64", feature = "rayon"))]
use rayon::prelude::*;

/// Backend name used in logs and errors
pub const AVX2: &str = "avx2";

/// SIMD capability level detected at runtime
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdLevel {
    /// No usable SIMD
    Scalar = 0,
    /// AVX2 with FMA support (256-bit vectors, 8 f32s or 4 f64s)
    Avx2Fma = 1,
}

impl SimdLevel {
    /// Returns true if this level supports 256-bit operations
    #[inline]
    pub const fn has_avx2(self) -> bool {
        matches!(self, Self::Avx2Fma)
    }

    /// Returns the name of this SIMD level as a string
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avx2Fma => "AVX2+FMA",
            Self::Scalar => "Scalar",
        }
    }
}

impl std::fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Detect the best available SIMD level for the current CPU
///
/// The first call performs detection; later calls return the cached result.
#[inline]
pub fn detect_simd() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(detect_simd_uncached)
}

#[cold]
fn detect_simd_uncached() -> SimdLevel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            log::debug!("SIMD level detected: {}", SimdLevel::Avx2Fma);
            return SimdLevel::Avx2Fma;
        }
    }

    log::debug!("SIMD level detected: {}", SimdLevel::Scalar);
    SimdLevel::Scalar
}

/// Accelerated backend built on the AVX2 row kernels
#[derive(Copy, Clone, Debug)]
pub struct SimdBackend {
    level: SimdLevel,
}

impl Default for SimdBackend {
    fn default() -> Self {
        Self {
            level: detect_simd(),
        }
    }
}

impl SimdBackend {
    /// Backend pinned to a given level; levels the CPU lacks stay unavailable
    pub fn with_level(level: SimdLevel) -> Self {
        Self {
            level: level.min(detect_simd()),
        }
    }

    /// Level in use
    pub fn level(&self) -> SimdLevel {
        self.level
    }

    /// Row alignment of the padded format this backend prefers for `dtype`
    pub fn preferred_lanes(dtype: DType) -> usize {
        match dtype {
            DType::F64 => 4,
            _ => 8,
        }
    }
}

impl SoftmaxBackend for SimdBackend {
    fn name(&self) -> &'static str {
        AVX2
    }

    fn is_available(&self) -> bool {
        cfg!(all(feature = "simd", target_arch = "x86_64")) && self.level.has_avx2()
    }

    fn supports_mode(&self, _mode: SoftmaxMode) -> bool {
        true
    }

    fn supports_layout<T: Element>(&self, input: &TensorView<'_, T>) -> bool {
        matches!(T::DTYPE, DType::F32 | DType::F64)
            && input.numel() > 0
            && input.strides().last() == Some(&1)
            && input.strides().iter().all(|&s| s >= 0)
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
        if req == OpReq::Null {
            return Ok(());
        }
        if !self.is_available() {
            return Err(Error::Backend(format!(
                "{AVX2} backend is not available on this CPU"
            )));
        }
        if input.shape() != output.shape() {
            return Err(Error::shape_mismatch(input.shape(), output.shape()));
        }
        if axis >= input.ndim() {
            return Err(Error::InvalidDimension {
                dim: axis as isize,
                ndim: input.ndim(),
            });
        }
        if !self.supports_layout(input) {
            return Err(Error::layout(
                AVX2,
                format!(
                    "{:?} input {:?} in {} format",
                    T::DTYPE,
                    input.layout(),
                    input.format()
                ),
            ));
        }
        if output.layout().has_internal_overlap() {
            return Err(Error::layout(
                AVX2,
                format!("output layout {:?} aliases elements", output.layout()),
            ));
        }

        #[cfg(target_arch = "x86_64")]
        {
            let x_lanes = input.layout().lanes(axis);
            let y_lanes = output.layout().lanes(axis);
            let x_addr = input.as_ptr() as usize;
            let y_addr = output.as_mut_ptr() as usize;
            // SAFETY: views are bounds-checked, the output does not alias
            // itself, and the dtype match makes the pointer casts exact.
            unsafe {
                match T::DTYPE {
                    DType::F32 => {
                        run_lanes::<f32>(mode, x_addr, &x_lanes, y_addr, &y_lanes, req, opts);
                        return Ok(());
                    }
                    DType::F64 => {
                        run_lanes::<f64>(mode, x_addr, &x_lanes, y_addr, &y_lanes, req, opts);
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }

        #[cfg(not(target_arch = "x86_64"))]
        let _ = opts;

        Err(Error::unsupported_dtype(T::DTYPE, mode.forward_name()))
    }
}

/// Element types with AVX2 row kernels
#[cfg(target_arch = "x86_64")]
trait RowKernel: Element {
    unsafe fn softmax_row(src: *const Self, dst: *mut Self, len: usize);
    unsafe fn log_softmax_row(src: *const Self, dst: *mut Self, len: usize);
}

#[cfg(target_arch = "x86_64")]
impl RowKernel for f32 {
    #[inline]
    unsafe fn softmax_row(src: *const f32, dst: *mut f32, len: usize) {
        unsafe { avx2::softmax_row_f32(src, dst, len) }
    }

    #[inline]
    unsafe fn log_softmax_row(src: *const f32, dst: *mut f32, len: usize) {
        unsafe { avx2::log_softmax_row_f32(src, dst, len) }
    }
}

#[cfg(target_arch = "x86_64")]
impl RowKernel for f64 {
    #[inline]
    unsafe fn softmax_row(src: *const f64, dst: *mut f64, len: usize) {
        unsafe { avx2::softmax_row_f64(src, dst, len) }
    }

    #[inline]
    unsafe fn log_softmax_row(src: *const f64, dst: *mut f64, len: usize) {
        unsafe { avx2::log_softmax_row_f64(src, dst, len) }
    }
}

/// Normalize every lane, gathering and scattering when strides require it
///
/// # Safety
/// `E` must be the element type behind both addresses, every lane element
/// must be in bounds, and the output lanes must be pairwise disjoint.
#[cfg(target_arch = "x86_64")]
unsafe fn run_lanes<E: RowKernel>(
    mode: SoftmaxMode,
    x_addr: usize,
    x_lanes: &AxisLanes,
    y_addr: usize,
    y_lanes: &AxisLanes,
    req: OpReq,
    opts: &KernelOptions,
) {
    let len = x_lanes.axis_len();
    let kernel: unsafe fn(*const E, *mut E, usize) = match mode {
        SoftmaxMode::Softmax => E::softmax_row,
        SoftmaxMode::LogSoftmax => E::log_softmax_row,
    };

    let lane = |src_row: &mut Vec<E>, dst_row: &mut Vec<E>, l: usize| unsafe {
        let x = x_addr as *const E;
        let y = y_addr as *mut E;

        let x_base = x_lanes.base(l);
        let x_stride = x_lanes.axis_stride();
        let src = if x_stride == 1 {
            x.offset(x_base)
        } else {
            for (k, slot) in src_row.iter_mut().enumerate() {
                *slot = *x.offset(x_base + k as isize * x_stride);
            }
            src_row.as_ptr()
        };

        let y_base = y_lanes.base(l);
        let y_stride = y_lanes.axis_stride();
        if y_stride == 1 && req == OpReq::WriteTo {
            kernel(src, y.offset(y_base), len);
        } else {
            kernel(src, dst_row.as_mut_ptr(), len);
            for (k, &v) in dst_row.iter().enumerate() {
                let p = y.offset(y_base + k as isize * y_stride);
                *p = req.combine(*p, v.to_f64());
            }
        }
    };

    let count = x_lanes.count();

    #[cfg(feature = "rayon")]
    if count >= opts.parallel_min_lanes.max(2) {
        (0..count).into_par_iter().with_min_len(16).for_each_init(
            || (vec![E::zero(); len], vec![E::zero(); len]),
            |(src_row, dst_row), l| lane(src_row, dst_row, l),
        );
        return;
    }

    #[cfg(not(feature = "rayon"))]
    let _ = opts;

    let mut src_row = vec![E::zero(); len];
    let mut dst_row = vec![E::zero(); len];
    for l in 0..count {
        lane(&mut src_row, &mut dst_row, l);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::softmax::forward as generic_forward;
    use crate::tensor::{Layout, MemoryFormat, Tensor};

    fn avx2() -> Option<SimdBackend> {
        let backend = SimdBackend::default();
        backend.is_available().then_some(backend)
    }

    fn max_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_supports_layout() {
        let backend = SimdBackend::default();
        let data = [0.0f32; 12];
        let dense = TensorView::from_slice(&data, &[3, 4]).unwrap();
        assert!(backend.supports_layout(&dense));
        assert!(!backend.supports_layout(&dense.transpose(0, 1).unwrap()));
        assert!(!backend.supports_layout(&dense.flip(0).unwrap()));

        let empty: [f32; 0] = [];
        assert!(!backend.supports_layout(&TensorView::from_slice(&empty, &[0, 4]).unwrap()));

        let doubles = [0.0f64; 4];
        assert!(backend.supports_layout(&TensorView::from_slice(&doubles, &[4]).unwrap()));
    }

    #[test]
    fn test_scalar_level_unavailable() {
        let backend = SimdBackend::with_level(SimdLevel::Scalar);
        assert!(!backend.is_available());
        let x = [1.0f32; 4];
        let mut y = [0.0f32; 4];
        let err = backend
            .forward(
                SoftmaxMode::Softmax,
                &TensorView::from_slice(&x, &[4]).unwrap(),
                0,
                OpReq::WriteTo,
                &mut TensorViewMut::from_slice(&mut y, &[4]).unwrap(),
                &KernelOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[test]
    fn test_matches_generic_all_axes() {
        let Some(backend) = avx2() else { return };
        let shape = [3, 5, 37];
        let x: Vec<f32> = (0..555).map(|i| ((i * 7919 % 113) as f32) * 0.13 - 7.0).collect();
        let xv = TensorView::from_slice(&x, &shape).unwrap();
        let opts = KernelOptions::default();

        for mode in [SoftmaxMode::Softmax, SoftmaxMode::LogSoftmax] {
            for axis in 0..3 {
                let mut fast = vec![0.0f32; 555];
                let mut slow = vec![0.0f32; 555];
                backend
                    .forward(mode, &xv, axis, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut fast, &shape).unwrap(), &opts)
                    .unwrap();
                generic_forward(mode, &xv, axis as isize, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut slow, &shape).unwrap(), &opts)
                    .unwrap();
                let diff = max_diff(&fast, &slow);
                assert!(diff < 2e-5, "{mode} axis {axis}: max diff {diff}");
            }
        }
    }

    #[test]
    fn test_padded_input_and_add_to() {
        let Some(backend) = avx2() else { return };
        let t = Tensor::from_vec((0..30).map(|v| v as f64 * 0.25).collect(), &[3, 10]).unwrap();
        let p = Tensor::padded_from(&t.view(), SimdBackend::preferred_lanes(DType::F64)).unwrap();
        assert_eq!(p.format(), MemoryFormat::Padded { lanes: 4 });
        assert!(backend.supports_layout(&p.view()));

        let mut out = Tensor::full(&[3, 10], 1.0f64);
        backend
            .forward(SoftmaxMode::Softmax, &p.view(), 1, OpReq::AddTo, &mut out.view_mut(), &KernelOptions::default())
            .unwrap();
        for row in out.to_vec().chunks(10) {
            let sum: f64 = row.iter().sum();
            assert!((sum - 11.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_strided_output() {
        let Some(backend) = avx2() else { return };
        let x: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let mut buf = vec![0.0f32; 24];
        let layout = Layout::contiguous(&[12, 2]).transpose(0, 1).unwrap();
        let mut y = TensorViewMut::new(&mut buf, layout).unwrap();
        backend
            .forward(
                SoftmaxMode::LogSoftmax,
                &TensorView::from_slice(&x, &[2, 12]).unwrap(),
                1,
                OpReq::WriteTo,
                &mut y,
                &KernelOptions::default(),
            )
            .unwrap();
        let out = y.to_vec();
        // equal spacing means both rows share the same log-softmax
        assert!(max_diff(&out[..12], &out[12..]) < 1e-5);
        let total: f32 = out[..12].iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_length_one_exact() {
        let Some(backend) = avx2() else { return };
        let x = [3.5f32, -1e30, 1e30];
        let mut y = [0.0f32; 3];
        let xv = TensorView::from_slice(&x, &[3, 1]).unwrap();
        backend
            .forward(SoftmaxMode::Softmax, &xv, 1, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut y, &[3, 1]).unwrap(), &KernelOptions::default())
            .unwrap();
        assert_eq!(y, [1.0; 3]);
        backend
            .forward(SoftmaxMode::LogSoftmax, &xv, 1, OpReq::WriteTo, &mut TensorViewMut::from_slice(&mut y, &[3, 1]).unwrap(), &KernelOptions::default())
            .unwrap();
        assert_eq!(y, [0.0; 3]);
    }
}
