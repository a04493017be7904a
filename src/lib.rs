//! cpuforge - CPU compute backend for a tensor/BLAS engine
//!
//! Executes one tensor operation at a time across a phase-synchronized
//! intra-op worker pool. At device init a specialization selector probes
//! the host CPU and binds the best SIMD-optimized kernel set; per op, a
//! logarithmic work-width heuristic decides how many of the allocated
//! workers participate.

pub mod context;
pub mod device;
pub mod kernels;
pub mod storage;
pub mod tensor;

pub use context::Context;
pub use device::cpu::CpuDevice;
pub use device::cpu_features::{CpuFeature, CpuFeatures};
pub use device::pool::ThreadPool;
pub use device::{init_cpu_device, init_device, ComputeDevice, DeviceDescriptor, DeviceType};
pub use kernels::{select_specialization, ComputePayload, Kernel, KernelRegistry};
pub use storage::StorageBuffer;
pub use tensor::{Op, TensorError, TensorNode, TensorResult};
