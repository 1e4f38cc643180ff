//! Live GPU memory telemetry via `nvidia-smi`.
//!
//! Readings are taken fresh for every scheduling decision and never cached:
//! other processes allocate and free VRAM behind the gateway's back, so a
//! stale snapshot would let the planner over-commit a GPU.

use std::process::Command;

use crate::error::{GatewayError, Result};

/// Per-GPU memory readings, one entry per device in GPU order.
pub trait GpuTelemetry: Send + Sync {
    fn total_mib(&self) -> Result<Vec<u64>>;
    fn used_mib(&self) -> Result<Vec<u64>>;
    fn free_mib(&self) -> Result<Vec<u64>>;
}

/// Production probe shelling out to `nvidia-smi`.
pub struct NvidiaSmi;

impl NvidiaSmi {
    fn query(field: &str) -> Result<Vec<u64>> {
        let output = Command::new("nvidia-smi")
            .arg(format!("--query-gpu={}", field))
            .arg("--format=csv,nounits,noheader")
            .output()
            .map_err(|e| GatewayError::TelemetryUnavailable(format!("nvidia-smi: {}", e)))?;

        if !output.status.success() {
            return Err(GatewayError::TelemetryUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .lines()
            .map(parse_mib_line)
            .collect()
    }
}

impl GpuTelemetry for NvidiaSmi {
    fn total_mib(&self) -> Result<Vec<u64>> {
        Self::query("memory.total")
    }

    fn used_mib(&self) -> Result<Vec<u64>> {
        Self::query("memory.used")
    }

    fn free_mib(&self) -> Result<Vec<u64>> {
        Self::query("memory.free")
    }
}

/// Parse one `nvidia-smi` output line, tolerating unit suffixes.
fn parse_mib_line(line: &str) -> Result<u64> {
    let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().map_err(|_| {
        GatewayError::TelemetryUnavailable(format!("Unparsable nvidia-smi line: {:?}", line))
    })
}

/// Machine hostname, reported as the owner of catalog models.
///
/// Computed once at startup; falls back to `"unknown"` when the `hostname`
/// command is missing or fails.
pub fn hostname() -> String {
    match Command::new("hostname").output() {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => "unknown".to_string(),
    }
}
