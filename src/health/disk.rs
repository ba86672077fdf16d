//! Disk-usage probe using `statvfs(2)` on the configured mount point.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{HealthVerdict, Probe, ProbeError, ProbeResult, ServiceId};
use crate::config::DiskConfig;

/// Used and available space of one filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub used_percent: u8,
    pub available_bytes: u64,
}

pub struct DiskProbe {
    config: DiskConfig,
}

impl DiskProbe {
    pub fn new(config: DiskConfig) -> Self {
        Self { config }
    }
}

/// Map a usage percentage to a verdict and message tier.
pub fn classify_disk(usage: DiskUsage, config: &DiskConfig) -> (HealthVerdict, String) {
    let used = usage.used_percent;
    let avail = format_bytes(usage.available_bytes);
    if used >= config.critical_percent {
        (HealthVerdict::Unhealthy, format!("critically low: {used}% used, {avail} free"))
    } else if used >= config.low_percent {
        (HealthVerdict::Unhealthy, format!("low: {used}% used, {avail} free"))
    } else if used >= config.warning_percent {
        (HealthVerdict::Healthy, format!("getting full: {used}% used, {avail} free"))
    } else {
        (HealthVerdict::Healthy, format!("normal: {used}% used, {avail} free"))
    }
}

fn format_bytes(bytes: u64) -> String {
    const GIB: f64 = 1_073_741_824.0;
    const MIB: f64 = 1_048_576.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.1}G", b / GIB)
    } else {
        format!("{:.0}M", b / MIB)
    }
}

/// Usage of the filesystem holding `path`, `df`-style: used / (used + available to users).
#[allow(unsafe_code)]
pub fn disk_usage(path: &std::path::Path) -> Result<DiskUsage, ProbeError> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|e| ProbeError::Io(e.to_string()))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result != 0 {
        return Err(ProbeError::Io(format!(
            "statvfs failed for {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    let stat = unsafe { stat.assume_init() };

    #[allow(clippy::unnecessary_cast)]
    let (blocks, bfree, bavail, frsize) = (
        stat.f_blocks as u64,
        stat.f_bfree as u64,
        stat.f_bavail as u64,
        stat.f_frsize as u64,
    );
    let used = blocks.saturating_sub(bfree);
    let denom = used + bavail;
    let used_percent = if denom == 0 {
        0
    } else {
        // round up like df
        ((used * 100).div_ceil(denom)).min(100) as u8
    };

    Ok(DiskUsage {
        used_percent,
        available_bytes: bavail.saturating_mul(frsize),
    })
}

#[async_trait]
impl Probe for DiskProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::Disk
    }

    async fn check(&self) -> ProbeResult {
        let path: PathBuf = self.config.path.clone();
        let usage = tokio::task::spawn_blocking(move || disk_usage(&path)).await;
        match usage {
            Ok(Ok(usage)) => {
                let (verdict, message) = classify_disk(usage, &self.config);
                ProbeResult::new(ServiceId::Disk, verdict, message)
            }
            Ok(Err(e)) => ProbeResult::unhealthy(ServiceId::Disk, format!("check failed: {e}")),
            Err(e) => ProbeResult::unhealthy(ServiceId::Disk, format!("check failed: {e}")),
        }
    }
}
