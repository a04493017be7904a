//! Runtime CPU feature detection for kernel dispatch

/// CPU feature tags the kernel specializations reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFeature {
    Sse41,
    Avx,
    Avx2,
    Fma,
    Avx512f,
}

/// The set of features detected on (or mocked for) a host CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    sse41: bool,
    avx: bool,
    avx2: bool,
    fma: bool,
    avx512f: bool,
}

impl CpuFeatures {
    /// Probe the host CPU.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            CpuFeatures {
                sse41: std::arch::is_x86_feature_detected!("sse4.1"),
                avx: std::arch::is_x86_feature_detected!("avx"),
                avx2: std::arch::is_x86_feature_detected!("avx2"),
                fma: std::arch::is_x86_feature_detected!("fma"),
                avx512f: std::arch::is_x86_feature_detected!("avx512f"),
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            CpuFeatures::default()
        }
    }

    /// An empty feature set; forces the generic kernel fallback.
    pub fn none() -> Self {
        CpuFeatures::default()
    }

    /// Add one feature to the set.
    pub fn with(mut self, feature: CpuFeature) -> Self {
        match feature {
            CpuFeature::Sse41 => self.sse41 = true,
            CpuFeature::Avx => self.avx = true,
            CpuFeature::Avx2 => self.avx2 = true,
            CpuFeature::Fma => self.fma = true,
            CpuFeature::Avx512f => self.avx512f = true,
        }
        self
    }

    pub fn has(&self, feature: CpuFeature) -> bool {
        match feature {
            CpuFeature::Sse41 => self.sse41,
            CpuFeature::Avx => self.avx,
            CpuFeature::Avx2 => self.avx2,
            CpuFeature::Fma => self.fma,
            CpuFeature::Avx512f => self.avx512f,
        }
    }
}
