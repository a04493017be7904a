//! CPU compute device
//!
//! Owns the kernel registry, the worker pool and the dynamic work-scaling
//! parameters. Eager execution is serialized at the device: `exec_fwd` does
//! not return until the op has fully retired, so at most one op is ever in
//! flight per pool.

use std::sync::Arc;

use crate::context::Context;
use crate::device::pool::ThreadPool;
use crate::device::{ComputeDevice, DeviceType};
use crate::kernels::{select_specialization, ComputePayload, KernelRegistry};
use crate::storage::StorageBuffer;
use crate::tensor::TensorNode;

/// CPU device with an optional intra-op worker pool.
pub struct CpuDevice {
    name: String,
    /// None iff the device is single threaded.
    pool: Option<ThreadPool>,
    num_allocated_workers: usize,
    kernels: Arc<KernelRegistry>,
    growth_scale: f64,
    numel_threshold: usize,
}

impl CpuDevice {
    /// Create a device with `num_threads` workers (already clamped by the
    /// factory). Selects the kernel specialization and, for more than one
    /// thread, brings the worker pool online.
    pub fn new(ctx: &Context, num_threads: usize) -> Self {
        let mut registry = KernelRegistry::new();
        select_specialization(ctx, &mut registry);
        let kernels = Arc::new(registry);
        let pool = if num_threads > 1 {
            Some(ThreadPool::new(num_threads, Arc::clone(&kernels)))
        } else {
            None
        };
        CpuDevice {
            name: format!(
                "{} - {} - Using {} Compute Threads",
                DeviceType::Cpu,
                ctx.cpu_name(),
                num_threads
            ),
            pool,
            num_allocated_workers: num_threads,
            kernels,
            growth_scale: 0.3,
            numel_threshold: 250_000,
        }
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool(&self) -> Option<&ThreadPool> {
        self.pool.as_ref()
    }

    pub fn num_allocated_workers(&self) -> usize {
        self.num_allocated_workers
    }

    pub fn growth_scale(&self) -> f64 {
        self.growth_scale
    }

    pub fn set_growth_scale(&mut self, growth_scale: f64) {
        self.growth_scale = growth_scale;
    }

    pub fn numel_threshold(&self) -> usize {
        self.numel_threshold
    }

    pub fn set_numel_threshold(&mut self, numel_threshold: usize) {
        self.numel_threshold = numel_threshold;
    }

    /// How many workers to use for an op with `numel` output elements.
    ///
    /// Parallel overhead dominates for small tensors, so the width grows
    /// logarithmically past the threshold:
    /// `clamp(ceil(growth_scale * log2(numel - threshold)), 1, allocated)`.
    pub fn dynamic_work_scaling(&self, numel: usize) -> usize {
        if self.pool.is_none() || numel <= self.numel_threshold {
            return 1;
        }
        let m = (numel - self.numel_threshold) as f64;
        let workers = (self.growth_scale * m.log2()).ceil() as usize;
        workers.clamp(1, self.num_allocated_workers)
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn is_async(&self) -> bool {
        false
    }

    fn exec_fwd(&self, node: &Arc<TensorNode>) {
        let num_active_workers = self.dynamic_work_scaling(node.numel());
        match &self.pool {
            Some(pool) if num_active_workers > 1 => {
                pool.parallel_compute(node, num_active_workers);
            }
            _ => {
                // Single threaded mode: the calling thread does the work.
                let payload = ComputePayload {
                    node: Some(Arc::clone(node)),
                    thread_idx: 0,
                    thread_num: 1,
                };
                self.kernels.dispatch(&payload);
            }
        }
    }

    fn exec_bwd(&self, _root: &Arc<TensorNode>) {
        unimplemented!("backward execution is not implemented on the CPU device");
    }

    fn alloc_storage(&self, size: usize) -> StorageBuffer {
        StorageBuffer::alloc(size)
    }

    fn free_storage(&self, buf: StorageBuffer) {
        drop(buf);
    }
}
