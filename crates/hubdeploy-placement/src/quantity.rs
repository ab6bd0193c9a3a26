//! Resource quantity parsing.
//!
//! Accepts the Kubernetes quantity forms used in hardware requests:
//! CPU as cores or millicores (`"2"`, `"1.5"`, `"800m"`), memory with a
//! binary (`Ki`..`Pi`) or decimal (`k`..`P`) suffix, or plain bytes.

use crate::error::{PlacementError, PlacementResult};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Parse a CPU quantity into cores.
pub fn parse_cpu_cores(s: &str) -> PlacementResult<f64> {
    let s = s.trim();
    let invalid = || PlacementError::InvalidCpu(s.to_string());
    let (number, scale) = match s.strip_suffix('m') {
        Some(milli) => (milli, 1000.0),
        None => (s, 1.0),
    };
    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    // Millicores round up, matching how the cluster reports them.
    let millis = (value * 1000.0 / scale).ceil();
    Ok(millis / 1000.0)
}

/// Parse a memory quantity into GiB.
pub fn parse_memory_gib(s: &str) -> PlacementResult<f64> {
    let s = s.trim();
    let invalid = || PlacementError::InvalidMemory(s.to_string());
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let multiplier = match suffix {
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => GIB,
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "" => 1.0,
        _ => return Err(invalid()),
    };
    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value * multiplier / GIB)
}
