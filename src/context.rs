//! Engine context: host CPU identity and capabilities

use once_cell::sync::Lazy;

use crate::device::cpu_features::{CpuFeature, CpuFeatures};

static HOST_FEATURES: Lazy<CpuFeatures> = Lazy::new(CpuFeatures::detect);

/// Host information shared by every device: the CPU model string, the
/// virtual core count and the detected feature set. Tests construct a
/// context with a mocked feature set via [`Context::with_features`].
#[derive(Debug, Clone)]
pub struct Context {
    cpu_name: String,
    virtual_cores: usize,
    features: CpuFeatures,
}

impl Context {
    /// Probe the host.
    pub fn new() -> Self {
        Context {
            cpu_name: detect_cpu_name(),
            virtual_cores: num_cpus::get(),
            features: *HOST_FEATURES,
        }
    }

    /// Context with an explicit feature set and CPU identity.
    pub fn with_features(
        cpu_name: impl Into<String>,
        virtual_cores: usize,
        features: CpuFeatures,
    ) -> Self {
        Context {
            cpu_name: cpu_name.into(),
            virtual_cores,
            features,
        }
    }

    pub fn cpu_name(&self) -> &str {
        &self.cpu_name
    }

    /// Number of virtual cores; 0 is possible when detection failed and the
    /// device factory clamps it to 1.
    pub fn virtual_cores(&self) -> usize {
        self.virtual_cores
    }

    /// True when the host CPU supports `feature`.
    pub fn has_feature(&self, feature: CpuFeature) -> bool {
        self.features.has(feature)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn detect_cpu_name() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
            for line in cpuinfo.lines() {
                if line.starts_with("model name") {
                    if let Some((_, name)) = line.split_once(':') {
                        return name.trim().to_owned();
                    }
                }
            }
        }
    }
    String::from("Unknown CPU")
}
