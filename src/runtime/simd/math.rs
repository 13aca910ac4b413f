//! AVX2 exponential and horizontal reductions
//!
//! # Algorithm
//!
//! `exp(x) = 2^n * exp(r)` with `n = round(x * log2(e))` and
//! `r = (x * log2(e) - n) * ln(2)`, so `|r| <= ln(2) / 2`. `exp(r)` is a
//! Taylor polynomial evaluated with FMA: degree 6 for f32 and degree 11 for
//! f64, so the polynomial error stays below the rounding error of the range
//! reduction for large `|x|`. Inputs are clamped to the
//! range where `2^n` is a normal number; anything below the clamp underflows
//! to zero.
//!
//! # Safety
//!
//! All functions require AVX2 and FMA CPU features.

use std::arch::x86_64::*;

const MIN_F32: f32 = -88.0;
const MAX_F32: f32 = 88.0;
const MIN_F64: f64 = -709.0;
const MAX_F64: f64 = 709.0;

/// `1 / k!` for `k = 0..=11`
const INV_FACT: [f64; 12] = [
    1.0,
    1.0,
    1.0 / 2.0,
    1.0 / 6.0,
    1.0 / 24.0,
    1.0 / 120.0,
    1.0 / 720.0,
    1.0 / 5040.0,
    1.0 / 40320.0,
    1.0 / 362880.0,
    1.0 / 3628800.0,
    1.0 / 39916800.0,
];

/// Vector exp for 8 f32 values
///
/// # Safety
/// Requires AVX2 and FMA CPU features.
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn exp_f32(x: __m256) -> __m256 {
    let log2e = _mm256_set1_ps(std::f32::consts::LOG2_E);
    let ln2 = _mm256_set1_ps(std::f32::consts::LN_2);

    let x = _mm256_max_ps(x, _mm256_set1_ps(MIN_F32));
    let x = _mm256_min_ps(x, _mm256_set1_ps(MAX_F32));

    let y = _mm256_mul_ps(x, log2e);
    let n = _mm256_round_ps::<{ _MM_FROUND_TO_NEAREST_INT | _MM_FROUND_NO_EXC }>(y);
    let r = _mm256_mul_ps(_mm256_sub_ps(y, n), ln2);

    // Horner, highest degree first
    let mut poly = _mm256_set1_ps(INV_FACT[6] as f32);
    for k in (0..6).rev() {
        poly = _mm256_fmadd_ps(poly, r, _mm256_set1_ps(INV_FACT[k] as f32));
    }

    // 2^n = reinterpret((n + 127) << 23)
    let n_i32 = _mm256_cvtps_epi32(n);
    let exp_bits = _mm256_slli_epi32::<23>(_mm256_add_epi32(n_i32, _mm256_set1_epi32(127)));
    _mm256_mul_ps(_mm256_castsi256_ps(exp_bits), poly)
}

/// Vector exp for 4 f64 values
///
/// AVX2 has no packed f64 -> i64 conversion, so `2^n` is built per lane.
///
/// # Safety
/// Requires AVX2 and FMA CPU features.
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn exp_f64(x: __m256d) -> __m256d {
    let log2e = _mm256_set1_pd(std::f64::consts::LOG2_E);
    let ln2 = _mm256_set1_pd(std::f64::consts::LN_2);

    let x = _mm256_max_pd(x, _mm256_set1_pd(MIN_F64));
    let x = _mm256_min_pd(x, _mm256_set1_pd(MAX_F64));

    let y = _mm256_mul_pd(x, log2e);
    let n = _mm256_round_pd::<{ _MM_FROUND_TO_NEAREST_INT | _MM_FROUND_NO_EXC }>(y);
    let r = _mm256_mul_pd(_mm256_sub_pd(y, n), ln2);

    let mut poly = _mm256_set1_pd(INV_FACT[11]);
    for k in (0..11).rev() {
        poly = _mm256_fmadd_pd(poly, r, _mm256_set1_pd(INV_FACT[k]));
    }

    let mut n_arr = [0.0f64; 4];
    let mut out = [0.0f64; 4];
    _mm256_storeu_pd(n_arr.as_mut_ptr(), n);
    _mm256_storeu_pd(out.as_mut_ptr(), poly);
    for (o, &n_i) in out.iter_mut().zip(n_arr.iter()) {
        let bits = ((n_i as i64 + 1023) as u64) << 52;
        *o *= f64::from_bits(bits);
    }
    _mm256_loadu_pd(out.as_ptr())
}

/// Horizontal maximum of 8 f32 values
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn hmax_f32(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let max128 = _mm_max_ps(low, high);
    let shuf = _mm_movehdup_ps(max128);
    let max64 = _mm_max_ps(max128, shuf);
    let shuf2 = _mm_movehl_ps(max64, max64);
    _mm_cvtss_f32(_mm_max_ss(max64, shuf2))
}

/// Horizontal maximum of 4 f64 values
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn hmax_f64(v: __m256d) -> f64 {
    let high = _mm256_extractf128_pd(v, 1);
    let low = _mm256_castpd256_pd128(v);
    let max128 = _mm_max_pd(low, high);
    let shuf = _mm_unpackhi_pd(max128, max128);
    _mm_cvtsd_f64(_mm_max_sd(max128, shuf))
}

/// Horizontal sum of 8 f32 values
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn hsum_f32(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(low, high);
    let shuf = _mm_movehdup_ps(sum128);
    let sum64 = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sum64, sum64);
    _mm_cvtss_f32(_mm_add_ss(sum64, shuf2))
}

/// Horizontal sum of 4 f64 values
#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
pub unsafe fn hsum_f64(v: __m256d) -> f64 {
    let high = _mm256_extractf128_pd(v, 1);
    let low = _mm256_castpd256_pd128(v);
    let sum128 = _mm_add_pd(low, high);
    let shuf = _mm_unpackhi_pd(sum128, sum128);
    _mm_cvtsd_f64(_mm_add_sd(sum128, shuf))
}
