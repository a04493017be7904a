//! Kernel registry and runtime specialization selection
//!
//! The registry is a table of forward-kernel function pointers indexed by
//! opcode. At device init the specialization selector probes the host CPU
//! and injects one kernel set: the strongest SIMD specialization the CPU
//! supports, or the generic fallback. The table is read-only afterwards, so
//! the hot path is a single indirect call with no locking.

pub(crate) mod generic;

#[cfg(target_arch = "x86_64")]
pub(crate) mod amd64;

use std::sync::Arc;

use crate::context::Context;
use crate::tensor::{Op, TensorNode};

/// Per-worker description of the operation being executed this phase.
///
/// Kernels partition the output by `thread_idx` of `thread_num` and write
/// only their shard; inputs are read-only. A `None` node means there is
/// nothing to do this phase.
#[derive(Debug)]
pub struct ComputePayload {
    pub node: Option<Arc<TensorNode>>,
    pub thread_idx: usize,
    pub thread_num: usize,
}

/// A forward compute kernel. Kernels never block, never touch pool state
/// and hold no locks; the pool provides the barrier outside.
pub type Kernel = fn(&ComputePayload);

/// Forward-kernel table indexed by opcode.
pub struct KernelRegistry {
    fwd: [Option<Kernel>; Op::COUNT],
}

impl KernelRegistry {
    /// Create an empty registry. [`select_specialization`] populates it.
    pub fn new() -> Self {
        KernelRegistry {
            fwd: [None; Op::COUNT],
        }
    }

    /// Install the forward kernel for `op`.
    pub fn install(&mut self, op: Op, kernel: Kernel) {
        self.fwd[op as usize] = Some(kernel);
    }

    /// True once every opcode has a kernel.
    pub fn is_fully_populated(&self) -> bool {
        self.fwd.iter().all(Option::is_some)
    }

    /// Run the kernel for the payload's node, if any.
    pub fn dispatch(&self, payload: &ComputePayload) {
        if let Some(node) = &payload.node {
            let kernel = self.fwd[node.op() as usize]
                .expect("kernel registry has no entry for dispatched op");
            kernel(payload);
        }
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe the host CPU and inject the best matching kernel specialization
/// into `registry`. Returns false when the generic fallback was injected.
#[cfg(target_arch = "x86_64")]
pub fn select_specialization(ctx: &Context, registry: &mut KernelRegistry) -> bool {
    amd64::detect_optimal_specialization(ctx, registry)
}

/// Probe the host CPU and inject the best matching kernel specialization
/// into `registry`. Returns false when the generic fallback was injected.
#[cfg(not(target_arch = "x86_64"))]
pub fn select_specialization(_ctx: &Context, registry: &mut KernelRegistry) -> bool {
    generic::inject_kernels(registry);
    tracing::info!("no BLAS specializations for this architecture, using the generic fallback");
    false
}
