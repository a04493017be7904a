//! x86-64 BLAS specializations with runtime CPU detection
//!
//! Each specialization re-instantiates the shared kernel bodies inside
//! `#[target_feature]` functions, so the compiler emits one vectorized copy
//! of every kernel per feature level. The selector probes the host CPU at
//! device init and injects the strongest matching set.

use super::{generic, KernelRegistry};
use crate::context::Context;
use crate::device::cpu_features::CpuFeature;

/// One dynamically selectable kernel set.
pub(crate) struct BlasSpecialization {
    pub name: &'static str,
    /// CPU features the host must support, all of them.
    pub features: &'static [CpuFeature],
    pub inject_kernels: fn(&mut KernelRegistry),
}

macro_rules! blas_specialization {
    ($mod_name:ident, $enable:literal, $($op:ident => $op_fn:ident),+ $(,)?) => {
        pub(crate) mod $mod_name {
            use crate::kernels::KernelRegistry;
            use crate::tensor::Op;

            mod vectorized {
                use crate::kernels::{generic, ComputePayload};

                $(
                    #[target_feature(enable = $enable)]
                    pub(super) unsafe fn $op_fn(payload: &ComputePayload) {
                        generic::$op_fn(payload);
                    }
                )+
            }

            $(
                fn $op_fn(payload: &crate::kernels::ComputePayload) {
                    // SAFETY: the selector installs this set only after the
                    // host reported every feature it requires.
                    unsafe { vectorized::$op_fn(payload) }
                }
            )+

            pub(crate) fn inject_kernels(registry: &mut KernelRegistry) {
                $(
                    registry.install(Op::$op, $op_fn);
                )+
            }
        }
    };
}

macro_rules! blas_specialization_levels {
    ($(($mod_name:ident, $enable:literal)),+ $(,)?) => {
        $(
            blas_specialization!(
                $mod_name,
                $enable,
                Nop => nop,
                Add => add_f32,
                Sub => sub_f32,
                Mul => mul_f32,
                Div => div_f32,
                Neg => neg_f32,
                Abs => abs_f32,
                Sqrt => sqrt_f32,
                Exp => exp_f32,
                Relu => relu_f32,
                Silu => silu_f32,
                Sum => sum_f32,
                Softmax => softmax_f32,
                MatMul => matmul_f32,
            );
        )+
    };
}

blas_specialization_levels!(
    (avx512f, "avx512f"),
    (avx2, "avx2,fma"),
    (avx, "avx"),
    (sse41, "sse4.1"),
);

/// Dynamically selectable kernel sets, sorted from best to worst. The order
/// is the tie-break rule: the first fully supported set wins.
const AMD64_BLAS_SPECIALIZATIONS: &[BlasSpecialization] = &[
    BlasSpecialization {
        name: "amd64_avx512f",
        features: &[CpuFeature::Avx512f],
        inject_kernels: avx512f::inject_kernels,
    },
    BlasSpecialization {
        name: "amd64_avx2",
        features: &[CpuFeature::Avx2, CpuFeature::Fma],
        inject_kernels: avx2::inject_kernels,
    },
    BlasSpecialization {
        name: "amd64_avx",
        features: &[CpuFeature::Avx],
        inject_kernels: avx::inject_kernels,
    },
    BlasSpecialization {
        name: "amd64_sse41",
        features: &[CpuFeature::Sse41],
        inject_kernels: sse41::inject_kernels,
    },
];

/// Find the best kernel specialization for the host CPU and inject it.
/// Returns false when no specialization matched and the fallback is active.
pub(crate) fn detect_optimal_specialization(
    ctx: &Context,
    registry: &mut KernelRegistry,
) -> bool {
    select_from(AMD64_BLAS_SPECIALIZATIONS, ctx, registry)
}

fn select_from(
    specializations: &[BlasSpecialization],
    ctx: &Context,
    registry: &mut KernelRegistry,
) -> bool {
    for spec in specializations {
        // A specialization without required features is malformed; skip it.
        if spec.features.is_empty() {
            continue;
        }
        if spec.features.iter().all(|&f| ctx.has_feature(f)) {
            (spec.inject_kernels)(registry);
            tracing::info!("using BLAS specialization: {}", spec.name);
            return true;
        }
    }
    generic::inject_kernels(registry);
    tracing::info!("no BLAS specialization matches the host CPU, using the generic fallback");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cpu_features::CpuFeatures;

    #[test]
    fn test_specializations_sorted_best_to_worst() {
        let names: Vec<&str> = AMD64_BLAS_SPECIALIZATIONS
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            ["amd64_avx512f", "amd64_avx2", "amd64_avx", "amd64_sse41"]
        );
    }

    #[test]
    fn test_every_specialization_injects_every_op() {
        for spec in AMD64_BLAS_SPECIALIZATIONS {
            let mut registry = KernelRegistry::new();
            (spec.inject_kernels)(&mut registry);
            assert!(registry.is_fully_populated(), "{} is incomplete", spec.name);
        }
    }

    #[test]
    fn test_first_supported_specialization_wins() {
        let ctx = Context::with_features("Mock CPU", 1, CpuFeatures::none().with(CpuFeature::Sse41));
        let mut registry = KernelRegistry::new();
        assert!(select_from(AMD64_BLAS_SPECIALIZATIONS, &ctx, &mut registry));
        assert!(registry.is_fully_populated());
    }

    #[test]
    fn test_malformed_specialization_is_skipped() {
        let malformed = [BlasSpecialization {
            name: "amd64_malformed",
            features: &[],
            inject_kernels: |_| panic!("malformed specialization must never inject"),
        }];
        let ctx = Context::with_features("Mock CPU", 1, CpuFeatures::detect());
        let mut registry = KernelRegistry::new();
        let specialized = select_from(&malformed, &ctx, &mut registry);
        assert!(!specialized);
        assert!(registry.is_fully_populated());
    }
}
