//! Generic scalar kernel bodies
//!
//! One shared body per operator. The fallback injects these directly; the
//! amd64 specializations re-instantiate the same bodies inside
//! `#[target_feature]` functions so the compiler re-vectorizes them for
//! each feature level.

use super::{ComputePayload, KernelRegistry};
use crate::tensor::Op;

/// Contiguous shard of `numel` elements owned by `thread_idx` of
/// `thread_num`. The shards of all workers are disjoint and cover the
/// whole range.
#[inline(always)]
fn chunk_range(numel: usize, thread_idx: usize, thread_num: usize) -> (usize, usize) {
    let chunk = (numel + thread_num - 1) / thread_num;
    let start = (thread_idx * chunk).min(numel);
    let end = (start + chunk).min(numel);
    (start, end)
}

#[inline(always)]
fn unary_elementwise(payload: &ComputePayload, f: impl Fn(f32) -> f32) {
    let node = match &payload.node {
        Some(node) => node,
        None => return,
    };
    let x = node.input(0).data();
    let (start, end) = chunk_range(node.numel(), payload.thread_idx, payload.thread_num);
    if start == end {
        return;
    }
    // SAFETY: `[start, end)` is this worker's shard; shards are disjoint.
    let out = unsafe { node.storage().f32_shard_mut(start, end - start) };
    for (o, &v) in out.iter_mut().zip(&x[start..end]) {
        *o = f(v);
    }
}

#[inline(always)]
fn binary_elementwise(payload: &ComputePayload, f: impl Fn(f32, f32) -> f32) {
    let node = match &payload.node {
        Some(node) => node,
        None => return,
    };
    let a = node.input(0).data();
    let b = node.input(1).data();
    let (start, end) = chunk_range(node.numel(), payload.thread_idx, payload.thread_num);
    if start == end {
        return;
    }
    // SAFETY: `[start, end)` is this worker's shard; shards are disjoint.
    let out = unsafe { node.storage().f32_shard_mut(start, end - start) };
    for ((o, &x), &y) in out.iter_mut().zip(&a[start..end]).zip(&b[start..end]) {
        *o = f(x, y);
    }
}

#[inline(always)]
pub(crate) fn nop(_payload: &ComputePayload) {}

#[inline(always)]
pub(crate) fn add_f32(payload: &ComputePayload) {
    binary_elementwise(payload, |x, y| x + y);
}

#[inline(always)]
pub(crate) fn sub_f32(payload: &ComputePayload) {
    binary_elementwise(payload, |x, y| x - y);
}

#[inline(always)]
pub(crate) fn mul_f32(payload: &ComputePayload) {
    binary_elementwise(payload, |x, y| x * y);
}

#[inline(always)]
pub(crate) fn div_f32(payload: &ComputePayload) {
    binary_elementwise(payload, |x, y| x / y);
}

#[inline(always)]
pub(crate) fn neg_f32(payload: &ComputePayload) {
    unary_elementwise(payload, |v| -v);
}

#[inline(always)]
pub(crate) fn abs_f32(payload: &ComputePayload) {
    unary_elementwise(payload, f32::abs);
}

#[inline(always)]
pub(crate) fn sqrt_f32(payload: &ComputePayload) {
    unary_elementwise(payload, f32::sqrt);
}

#[inline(always)]
pub(crate) fn exp_f32(payload: &ComputePayload) {
    unary_elementwise(payload, f32::exp);
}

#[inline(always)]
pub(crate) fn relu_f32(payload: &ComputePayload) {
    unary_elementwise(payload, |v| v.max(0.0));
}

#[inline(always)]
pub(crate) fn silu_f32(payload: &ComputePayload) {
    unary_elementwise(payload, |v| v / (1.0 + (-v).exp()));
}

/// Full reduction into a single output element. The output numel of 1 keeps
/// the work-width heuristic at one worker, so worker 0 owns the whole sum.
#[inline(always)]
pub(crate) fn sum_f32(payload: &ComputePayload) {
    let node = match &payload.node {
        Some(node) => node,
        None => return,
    };
    if payload.thread_idx != 0 {
        return;
    }
    let x = node.input(0).data();
    // SAFETY: only worker 0 writes the single output element.
    let out = unsafe { node.storage().f32_shard_mut(0, 1) };
    out[0] = x.iter().sum();
}

/// Row-wise softmax with max-subtraction for numerical stability; rows are
/// sharded across workers.
#[inline(always)]
pub(crate) fn softmax_f32(payload: &ComputePayload) {
    let node = match &payload.node {
        Some(node) => node,
        None => return,
    };
    let x = node.input(0).data();
    let shape = node.shape();
    let cols = shape[shape.len() - 1];
    let rows = node.numel() / cols;
    let (row_start, row_end) = chunk_range(rows, payload.thread_idx, payload.thread_num);
    for r in row_start..row_end {
        let row = &x[r * cols..(r + 1) * cols];
        // SAFETY: each row belongs to exactly one worker's shard.
        let out = unsafe { node.storage().f32_shard_mut(r * cols, cols) };
        let max_val = row.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let mut denom = 0.0f32;
        for (o, &v) in out.iter_mut().zip(row) {
            *o = (v - max_val).exp();
            denom += *o;
        }
        for o in out.iter_mut() {
            *o /= denom;
        }
    }
}

/// Row-major matmul; output rows are sharded across workers.
#[inline(always)]
pub(crate) fn matmul_f32(payload: &ComputePayload) {
    let node = match &payload.node {
        Some(node) => node,
        None => return,
    };
    let a = node.input(0).data();
    let b = node.input(1).data();
    let m = node.shape()[0];
    let n = node.shape()[1];
    let k = node.input(0).shape()[1];
    let (row_start, row_end) = chunk_range(m, payload.thread_idx, payload.thread_num);
    for i in row_start..row_end {
        // SAFETY: each output row belongs to exactly one worker's shard.
        let out_row = unsafe { node.storage().f32_shard_mut(i * n, n) };
        for (j, out) in out_row.iter_mut().enumerate() {
            let mut sum = 0.0f32;
            for l in 0..k {
                sum += a[i * k + l] * b[l * n + j];
            }
            *out = sum;
        }
    }
}

/// Inject the generic kernel set; the fallback when no SIMD specialization
/// matches the host CPU.
pub(crate) fn inject_kernels(registry: &mut KernelRegistry) {
    registry.install(Op::Nop, nop);
    registry.install(Op::Add, add_f32);
    registry.install(Op::Sub, sub_f32);
    registry.install(Op::Mul, mul_f32);
    registry.install(Op::Div, div_f32);
    registry.install(Op::Neg, neg_f32);
    registry.install(Op::Abs, abs_f32);
    registry.install(Op::Sqrt, sqrt_f32);
    registry.install(Op::Exp, exp_f32);
    registry.install(Op::Relu, relu_f32);
    registry.install(Op::Silu, silu_f32);
    registry.install(Op::Sum, sum_f32);
    registry.install(Op::Softmax, softmax_f32);
    registry.install(Op::MatMul, matmul_f32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_range_covers_everything() {
        for numel in [1usize, 7, 64, 1000] {
            for thread_num in [1usize, 2, 3, 8] {
                let mut covered = 0;
                let mut last_end = 0;
                for idx in 0..thread_num {
                    let (start, end) = chunk_range(numel, idx, thread_num);
                    assert!(start >= last_end);
                    assert!(end <= numel);
                    covered += end - start;
                    last_end = end;
                }
                assert_eq!(covered, numel);
                assert_eq!(last_end, numel);
            }
        }
    }

    #[test]
    fn test_chunk_range_trailing_workers_get_nothing() {
        // 4 elements over 8 workers: the last workers see an empty shard.
        let (start, end) = chunk_range(4, 7, 8);
        assert_eq!(start, end);
    }

    #[test]
    fn test_fallback_injects_every_op() {
        let mut registry = KernelRegistry::new();
        inject_kernels(&mut registry);
        assert!(registry.is_fully_populated());
    }
}
