//! Container-runtime cleanup: prune unused containers, volumes and images.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::runner::{CommandRunner, CommandSpec};

/// Result of a cleanup run. Individual prune failures are recorded, not raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub freed_mb: f64,
    pub failures: Vec<String>,
    pub message: String,
}

/// Sum the MB/GB figures reported in prune output, in MB.
///
/// Each line contributes its first MB figure, or its first GB figure when it
/// has no MB figure.
pub fn parse_reclaimed_mb(output: &str) -> f64 {
    static MB: OnceLock<Option<Regex>> = OnceLock::new();
    static GB: OnceLock<Option<Regex>> = OnceLock::new();
    let mb = MB.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*MB").ok());
    let gb = GB.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*GB").ok());

    let first = |re: &Option<Regex>, line: &str| -> Option<f64> {
        re.as_ref()?.captures(line)?.get(1)?.as_str().parse().ok()
    };

    output
        .lines()
        .filter_map(|line| first(mb, line).or_else(|| first(gb, line).map(|g| g * 1024.0)))
        .sum()
}

/// Run the three prune commands of `runtime` in sequence.
pub async fn cleanup_containers(runner: &dyn CommandRunner, runtime: &str, timeout: Duration) -> CleanupReport {
    let mut collected = String::new();
    let mut failures = Vec::new();

    for scope in ["system", "volume", "image"] {
        let spec = CommandSpec::new(runtime, [scope, "prune", "-f"]);
        match runner.run(&spec, timeout).await {
            Ok(out) => {
                collected.push_str(&out);
                collected.push('\n');
            }
            Err(e) => {
                warn!(command = %spec, error = %e, "Prune failed");
                failures.push(format!("{scope} prune: {e}"));
            }
        }
    }

    let freed_mb = parse_reclaimed_mb(&collected);
    let message = if freed_mb > 0.0 {
        format!("Cleanup finished, about {freed_mb:.1} MB reclaimed")
    } else if collected.trim().is_empty() {
        "Cleanup finished, nothing to reclaim".to_string()
    } else {
        "Cleanup finished, unused resources removed".to_string()
    };
    info!(freed_mb, failures = failures.len(), "Container cleanup done");

    CleanupReport {
        freed_mb,
        failures,
        message,
    }
}
