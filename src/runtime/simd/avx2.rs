//! AVX2 softmax row kernels
//!
//! Each kernel normalizes one contiguous row of `len` elements from `src`
//! into `dst`. `src` and `dst` must not overlap.

use std::arch::x86_64::*;

use super::math::{exp_f32, exp_f64, hmax_f32, hmax_f64, hsum_f32, hsum_f64};

const F32_LANES: usize = 8;
const F64_LANES: usize = 4;

/// Row max and `sum(exp(x - max))` for f32
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn row_stats_f32(src: *const f32, len: usize) -> (f32, f32) {
    let chunks = len / F32_LANES;

    let mut max_vec = _mm256_set1_ps(f32::NEG_INFINITY);
    for c in 0..chunks {
        max_vec = _mm256_max_ps(max_vec, _mm256_loadu_ps(src.add(c * F32_LANES)));
    }
    let mut max_val = hmax_f32(max_vec);
    for d in (chunks * F32_LANES)..len {
        let v = *src.add(d);
        if v > max_val {
            max_val = v;
        }
    }

    let v_max = _mm256_set1_ps(max_val);
    let mut sum_vec = _mm256_setzero_ps();
    for c in 0..chunks {
        let v = _mm256_loadu_ps(src.add(c * F32_LANES));
        sum_vec = _mm256_add_ps(sum_vec, exp_f32(_mm256_sub_ps(v, v_max)));
    }
    let mut sum = hsum_f32(sum_vec);
    for d in (chunks * F32_LANES)..len {
        sum += (*src.add(d) - max_val).exp();
    }
    (max_val, sum)
}

/// Row max and `sum(exp(x - max))` for f64
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn row_stats_f64(src: *const f64, len: usize) -> (f64, f64) {
    let chunks = len / F64_LANES;

    let mut max_vec = _mm256_set1_pd(f64::NEG_INFINITY);
    for c in 0..chunks {
        max_vec = _mm256_max_pd(max_vec, _mm256_loadu_pd(src.add(c * F64_LANES)));
    }
    let mut max_val = hmax_f64(max_vec);
    for d in (chunks * F64_LANES)..len {
        let v = *src.add(d);
        if v > max_val {
            max_val = v;
        }
    }

    let v_max = _mm256_set1_pd(max_val);
    let mut sum_vec = _mm256_setzero_pd();
    for c in 0..chunks {
        let v = _mm256_loadu_pd(src.add(c * F64_LANES));
        sum_vec = _mm256_add_pd(sum_vec, exp_f64(_mm256_sub_pd(v, v_max)));
    }
    let mut sum = hsum_f64(sum_vec);
    for d in (chunks * F64_LANES)..len {
        sum += (*src.add(d) - max_val).exp();
    }
    (max_val, sum)
}

/// Softmax of one f32 row
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn softmax_row_f32(src: *const f32, dst: *mut f32, len: usize) {
    let chunks = len / F32_LANES;
    let (max_val, sum) = row_stats_f32(src, len);

    let v_max = _mm256_set1_ps(max_val);
    let v_sum = _mm256_set1_ps(sum);
    for c in 0..chunks {
        let offset = c * F32_LANES;
        let e = exp_f32(_mm256_sub_ps(_mm256_loadu_ps(src.add(offset)), v_max));
        _mm256_storeu_ps(dst.add(offset), _mm256_div_ps(e, v_sum));
    }
    for d in (chunks * F32_LANES)..len {
        *dst.add(d) = (*src.add(d) - max_val).exp() / sum;
    }
}

/// Softmax of one f64 row
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn softmax_row_f64(src: *const f64, dst: *mut f64, len: usize) {
    let chunks = len / F64_LANES;
    let (max_val, sum) = row_stats_f64(src, len);

    let v_max = _mm256_set1_pd(max_val);
    let v_sum = _mm256_set1_pd(sum);
    for c in 0..chunks {
        let offset = c * F64_LANES;
        let e = exp_f64(_mm256_sub_pd(_mm256_loadu_pd(src.add(offset)), v_max));
        _mm256_storeu_pd(dst.add(offset), _mm256_div_pd(e, v_sum));
    }
    for d in (chunks * F64_LANES)..len {
        *dst.add(d) = (*src.add(d) - max_val).exp() / sum;
    }
}

/// Log-softmax of one f32 row
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn log_softmax_row_f32(src: *const f32, dst: *mut f32, len: usize) {
    let chunks = len / F32_LANES;
    let (max_val, sum) = row_stats_f32(src, len);

    // (x - max) - ln(sum), in that order
    let log_sum = sum.ln();
    let v_max = _mm256_set1_ps(max_val);
    let v_log_sum = _mm256_set1_ps(log_sum);
    for c in 0..chunks {
        let offset = c * F32_LANES;
        let shifted = _mm256_sub_ps(_mm256_loadu_ps(src.add(offset)), v_max);
        _mm256_storeu_ps(dst.add(offset), _mm256_sub_ps(shifted, v_log_sum));
    }
    for d in (chunks * F32_LANES)..len {
        *dst.add(d) = (*src.add(d) - max_val) - log_sum;
    }
}

/// Log-softmax of one f64 row
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn log_softmax_row_f64(src: *const f64, dst: *mut f64, len: usize) {
    let chunks = len / F64_LANES;
    let (max_val, sum) = row_stats_f64(src, len);

    let log_sum = sum.ln();
    let v_max = _mm256_set1_pd(max_val);
    let v_log_sum = _mm256_set1_pd(log_sum);
    for c in 0..chunks {
        let offset = c * F64_LANES;
        let shifted = _mm256_sub_pd(_mm256_loadu_pd(src.add(offset)), v_max);
        _mm256_storeu_pd(dst.add(offset), _mm256_sub_pd(shifted, v_log_sum));
    }
    for d in (chunks * F64_LANES)..len {
        *dst.add(d) = (*src.add(d) - max_val) - log_sum;
    }
}
