//! Compute device interface and the CPU device factory

pub mod cpu;
pub mod cpu_features;
pub mod pool;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::storage::StorageBuffer;
use crate::tensor::TensorNode;

use cpu::CpuDevice;

/// Supported compute device types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
        }
    }
}

/// Requested device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_type: DeviceType,
    /// Worker thread count; 0 means "use hardware concurrency".
    pub thread_count: usize,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        DeviceDescriptor {
            device_type: DeviceType::Cpu,
            thread_count: 0,
        }
    }
}

/// The contract every compute device implements. Execution is eager: a
/// forward call returns only after the op has fully retired.
pub trait ComputeDevice {
    fn name(&self) -> &str;
    fn device_type(&self) -> DeviceType;
    fn is_async(&self) -> bool;
    /// Execute one forward op.
    fn exec_fwd(&self, node: &Arc<TensorNode>);
    /// Execute the backward pass rooted at `root`.
    fn exec_bwd(&self, root: &Arc<TensorNode>);
    /// Allocate an aligned storage buffer of `size` bytes.
    fn alloc_storage(&self, size: usize) -> StorageBuffer;
    /// Release a storage buffer.
    fn free_storage(&self, buf: StorageBuffer);
}

/// Create the device described by `desc`.
pub fn init_device(ctx: &Context, desc: &DeviceDescriptor) -> Box<dyn ComputeDevice> {
    match desc.device_type {
        DeviceType::Cpu => Box::new(init_cpu_device(ctx, desc)),
    }
}

/// Create a CPU device, resolving `thread_count == 0` to the hardware
/// concurrency (floored at 1 when detection reports nothing).
pub fn init_cpu_device(ctx: &Context, desc: &DeviceDescriptor) -> CpuDevice {
    let hw_concurrency = ctx.virtual_cores().max(1);
    let num_threads = match desc.thread_count {
        0 => hw_concurrency,
        n => n,
    };
    CpuDevice::new(ctx, num_threads)
}
