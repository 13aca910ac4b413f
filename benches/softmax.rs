#![allow(dead_code)]

use fluxbench::{Bencher, flux};
use std::hint::black_box;

use stablemax::ops::softmax::{self, KernelOptions};
use stablemax::ops::{OpReq, SoftmaxMode};
use stablemax::runtime::{SimdBackend, SoftmaxBackend};
use stablemax::tensor::Tensor;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rand_vec_f32(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| ((i * 17 + 3) % 1000) as f32 / 100.0 - 5.0)
        .collect()
}

fn input(shape: &[usize]) -> Tensor<f32> {
    let n = shape.iter().product();
    Tensor::from_vec(rand_vec_f32(n), shape).unwrap()
}

fn bench_generic(b: &mut Bencher, mode: SoftmaxMode, shape: &[usize], axis: isize) {
    let x = input(shape);
    let mut y = Tensor::<f32>::zeros(shape);
    let opts = KernelOptions::default();
    b.iter(|| {
        softmax::forward(mode, &x.view(), axis, OpReq::WriteTo, &mut y.view_mut(), &opts).unwrap();
        black_box(y.data()[0])
    });
}

fn bench_simd(b: &mut Bencher, mode: SoftmaxMode, shape: &[usize], axis: usize) {
    let backend = SimdBackend::default();
    let x = input(shape);
    let mut y = Tensor::<f32>::zeros(shape);
    let opts = KernelOptions::default();
    if !backend.is_available() {
        return;
    }
    b.iter(|| {
        backend
            .forward(mode, &x.view(), axis, OpReq::WriteTo, &mut y.view_mut(), &opts)
            .unwrap();
        black_box(y.data()[0])
    });
}

// ---------------------------------------------------------------------------
// Last axis, f32
// ---------------------------------------------------------------------------

#[flux::bench(group = "softmax_last_axis_f32")]
fn generic_softmax_32x1024(b: &mut Bencher) {
    bench_generic(b, SoftmaxMode::Softmax, &[32, 1024], -1);
}

#[flux::bench(group = "softmax_last_axis_f32")]
fn simd_softmax_32x1024(b: &mut Bencher) {
    bench_simd(b, SoftmaxMode::Softmax, &[32, 1024], 1);
}

#[flux::bench(group = "softmax_last_axis_f32")]
fn generic_softmax_512x4096(b: &mut Bencher) {
    bench_generic(b, SoftmaxMode::Softmax, &[512, 4096], -1);
}

#[flux::bench(group = "softmax_last_axis_f32")]
fn simd_softmax_512x4096(b: &mut Bencher) {
    bench_simd(b, SoftmaxMode::Softmax, &[512, 4096], 1);
}

#[flux::bench(group = "log_softmax_last_axis_f32")]
fn generic_log_softmax_512x4096(b: &mut Bencher) {
    bench_generic(b, SoftmaxMode::LogSoftmax, &[512, 4096], -1);
}

#[flux::bench(group = "log_softmax_last_axis_f32")]
fn simd_log_softmax_512x4096(b: &mut Bencher) {
    bench_simd(b, SoftmaxMode::LogSoftmax, &[512, 4096], 1);
}

// ---------------------------------------------------------------------------
// Outer axis (strided lanes), f32
// ---------------------------------------------------------------------------

#[flux::bench(group = "softmax_outer_axis_f32")]
fn generic_softmax_axis0_1024x512(b: &mut Bencher) {
    bench_generic(b, SoftmaxMode::Softmax, &[1024, 512], 0);
}

#[flux::bench(group = "softmax_outer_axis_f32")]
fn simd_softmax_axis0_1024x512(b: &mut Bencher) {
    bench_simd(b, SoftmaxMode::Softmax, &[1024, 512], 0);
}

// ---------------------------------------------------------------------------
// Backward
// ---------------------------------------------------------------------------

#[flux::bench(group = "softmax_backward_f32")]
fn generic_softmax_backward_512x4096(b: &mut Bencher) {
    let shape = [512, 4096];
    let x = input(&shape);
    let mut y = Tensor::<f32>::zeros(&shape);
    softmax::softmax_forward(&x.view(), -1, OpReq::WriteTo, &mut y.view_mut()).unwrap();
    let dy = input(&shape);
    let mut dx = Tensor::<f32>::zeros(&shape);
    b.iter(|| {
        softmax::softmax_backward(&dy.view(), &y.view(), -1, OpReq::WriteTo, &mut dx.view_mut())
            .unwrap();
        black_box(dx.data()[0])
    });
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[flux::verify(
    expr = "simd_softmax_512x4096 / generic_softmax_512x4096 < 1.0",
    severity = "warning"
)]
struct VerifySimdFaster;

#[flux::synthetic(
    id = "simd_speedup_512x4096",
    formula = "generic_softmax_512x4096 / simd_softmax_512x4096",
    unit = "x"
)]
struct SimdSpeedup;

fn main() {
    fluxbench_cli::run().unwrap();
}
