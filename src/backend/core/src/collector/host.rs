//! Host-level metrics merged into raw samples.
//!
//! Gauges are published under `host.*` keys in the extended map. The disk
//! capacity figure also backfills the storage sample's total when the
//! database adapter could only report used bytes.

use std::collections::HashMap;

use crate::contracts::RawSample;

pub const LOAD_1: &str = "host.load1";
pub const LOAD_5: &str = "host.load5";
pub const MEMORY_USED_BYTES: &str = "host.memory_used_bytes";
pub const MEMORY_TOTAL_BYTES: &str = "host.memory_total_bytes";
pub const DISK_USED_BYTES: &str = "host.disk_used_bytes";
pub const DISK_TOTAL_BYTES: &str = "host.disk_total_bytes";

/// Gather host gauges. Returns an empty map on unsupported platforms or
/// syscall failure; host metrics are optional by contract.
pub fn gather() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    gather_sysinfo(&mut metrics);
    gather_disk(&mut metrics, "/");
    metrics
}

/// Merge host gauges into a raw sample.
pub fn merge_into(sample: &mut RawSample, metrics: HashMap<String, f64>) {
    if let Some(total) = metrics.get(DISK_TOTAL_BYTES).copied() {
        if let Some(storage) = sample.storage.as_mut() {
            if storage.total_bytes.is_none() && total > 0.0 {
                storage.total_bytes = Some(total as i64);
            }
        }
    }
    sample.extended.extend(metrics);
}

#[cfg(target_os = "linux")]
fn gather_sysinfo(metrics: &mut HashMap<String, f64>) {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    if unsafe { libc::sysinfo(&mut info) } != 0 {
        return;
    }

    // Load averages are fixed-point with a 16-bit fraction.
    let scale = 65_536.0;
    metrics.insert(LOAD_1.to_string(), info.loads[0] as f64 / scale);
    metrics.insert(LOAD_5.to_string(), info.loads[1] as f64 / scale);

    let unit = info.mem_unit.max(1) as f64;
    let total = info.totalram as f64 * unit;
    let free = (info.freeram as f64 + info.bufferram as f64) * unit;
    metrics.insert(MEMORY_TOTAL_BYTES.to_string(), total);
    metrics.insert(MEMORY_USED_BYTES.to_string(), (total - free).max(0.0));
}

#[cfg(not(target_os = "linux"))]
fn gather_sysinfo(_metrics: &mut HashMap<String, f64>) {}

#[cfg(unix)]
fn gather_disk(metrics: &mut HashMap<String, f64>, path: &str) {
    use std::ffi::CString;

    let Ok(c_path) = CString::new(path) else {
        return;
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return;
    }

    let frsize = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * frsize;
    let free = stat.f_bfree as f64 * frsize;
    metrics.insert(DISK_TOTAL_BYTES.to_string(), total);
    metrics.insert(DISK_USED_BYTES.to_string(), (total - free).max(0.0));
}

#[cfg(not(unix))]
fn gather_disk(_metrics: &mut HashMap<String, f64>, _path: &str) {}

/// Total system memory in bytes, used by the config-tuning optimiser.
pub fn total_memory_bytes() -> Option<u64> {
    let metrics = {
        let mut m = HashMap::new();
        gather_sysinfo(&mut m);
        m
    };
    metrics.get(MEMORY_TOTAL_BYTES).map(|v| *v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{DatabaseType, StorageSample};
    use chrono::Utc;

    #[test]
    fn test_merge_backfills_storage_total() {
        let mut sample = RawSample::new("db-1", DatabaseType::Postgres, Utc::now());
        sample.storage = Some(StorageSample {
            used_bytes: Some(1_000),
            total_bytes: None,
        });

        let mut metrics = HashMap::new();
        metrics.insert(DISK_TOTAL_BYTES.to_string(), 10_000.0);
        merge_into(&mut sample, metrics);

        assert_eq!(sample.storage.unwrap().total_bytes, Some(10_000));
        assert!(sample.extended.contains_key(DISK_TOTAL_BYTES));
    }

    #[test]
    fn test_merge_does_not_override_adapter_total() {
        let mut sample = RawSample::new("db-1", DatabaseType::Postgres, Utc::now());
        sample.storage = Some(StorageSample {
            used_bytes: Some(1_000),
            total_bytes: Some(5_000),
        });

        let mut metrics = HashMap::new();
        metrics.insert(DISK_TOTAL_BYTES.to_string(), 10_000.0);
        merge_into(&mut sample, metrics);

        assert_eq!(sample.storage.unwrap().total_bytes, Some(5_000));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_gather_reports_memory() {
        let metrics = gather();
        assert!(metrics.get(MEMORY_TOTAL_BYTES).copied().unwrap_or(0.0) > 0.0);
    }
}
