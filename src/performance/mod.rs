use serde::Serialize;
use std::fmt;
use sysinfo::{System, SystemExt};
use tracing::debug;

/// Minimum logical CPUs for the high tier
pub const HIGH_TIER_MIN_CPUS: usize = 4;
/// Minimum physical memory for the high tier
pub const HIGH_TIER_MIN_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Coarse host classification used by task programs to size their batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    #[default]
    Normal,
    High,
}

impl PerformanceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceTier::Normal => "normal",
            PerformanceTier::High => "high",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host capacity relevant to tier selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub logical_cpus: usize,
    pub total_memory: u64,
}

impl HostResources {
    /// Query the current host; `None` when the platform cannot be inspected
    pub fn inspect() -> Option<Self> {
        if !System::IS_SUPPORTED {
            return None;
        }

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let resources = HostResources {
            logical_cpus: system.cpus().len(),
            total_memory: system.total_memory(),
        };
        if resources.logical_cpus == 0 || resources.total_memory == 0 {
            return None;
        }
        Some(resources)
    }
}

/// Pick the tier for a performance hint (0 = autodetect, 1 = high, 2 = normal).
///
/// `host` is only consulted for autodetection; a missing reading keeps the
/// default tier.
pub fn resolve_tier(hint: u8, host: Option<HostResources>) -> PerformanceTier {
    match (hint, host) {
        (1, _) => PerformanceTier::High,
        (0, Some(host))
            if host.logical_cpus >= HIGH_TIER_MIN_CPUS
                && host.total_memory >= HIGH_TIER_MIN_MEMORY =>
        {
            PerformanceTier::High
        }
        _ => PerformanceTier::Normal,
    }
}

/// Resolve the tier, inspecting the host only when the hint asks for it
pub fn detect(hint: u8) -> PerformanceTier {
    let host = if hint == 0 {
        HostResources::inspect()
    } else {
        None
    };
    debug!("Host resources for performance detection: {:?}", host);
    resolve_tier(hint, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn host(cpus: usize, memory: u64) -> Option<HostResources> {
        Some(HostResources {
            logical_cpus: cpus,
            total_memory: memory,
        })
    }

    #[test]
    fn test_high_hint_is_unconditional() {
        assert_eq!(resolve_tier(1, None), PerformanceTier::High);
        assert_eq!(resolve_tier(1, host(1, GIB)), PerformanceTier::High);
    }

    #[test]
    fn test_autodetect_thresholds() {
        assert_eq!(resolve_tier(0, host(4, 4 * GIB)), PerformanceTier::High);
        assert_eq!(resolve_tier(0, host(16, 64 * GIB)), PerformanceTier::High);
        assert_eq!(resolve_tier(0, host(2, 64 * GIB)), PerformanceTier::Normal);
        assert_eq!(resolve_tier(0, host(8, 4 * GIB - 1)), PerformanceTier::Normal);
    }

    #[test]
    fn test_failed_inspection_falls_back_to_normal() {
        assert_eq!(resolve_tier(0, None), PerformanceTier::Normal);
    }

    #[test]
    fn test_normal_hint_ignores_host() {
        assert_eq!(resolve_tier(2, host(64, 512 * GIB)), PerformanceTier::Normal);
        assert_eq!(resolve_tier(7, host(64, 512 * GIB)), PerformanceTier::Normal);
    }

    #[test]
    fn test_tier_names() {
        assert_eq!(PerformanceTier::High.to_string(), "high");
        assert_eq!(PerformanceTier::default().as_str(), "normal");
    }
}
