//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Unknown keys are walked from the raw `toml::Value` before serde runs, so a
//! misspelt key produces a "did you mean?" warning instead of silently
//! falling back to the default. Warnings never break existing configs.

use std::collections::HashSet;

use super::WardenConfig;

/// Upper bound for any self-heal minute value (one year).
const MAX_MINUTES: i64 = 525_600;

/// Upper bound for snapshot retention age (days).
const MAX_AGE_DAYS: u32 = 36_500;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// Returns the complete set of valid dotted key paths for `WardenConfig`.
///
/// Any new field added to a config section must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "monitor",
        "monitor.interval_secs",
        "monitor.probe_timeout_secs",
        "monitor.data_dir",
        "gateway",
        "gateway.cli",
        "gateway.host",
        "gateway.port",
        "gateway.health_url",
        "model_server",
        "model_server.health_url",
        "model_server.systemd_unit",
        "model_server.launchd_labels",
        "container",
        "container.runtime",
        "container.name",
        "container.required",
        "container.space_required",
        "disk",
        "disk.path",
        "disk.critical_percent",
        "disk.low_percent",
        "disk.warning_percent",
        "load",
        "load.warn_ratio",
        "load.crit_ratio",
        "control",
        "control.command_timeout_secs",
        "control.start_settle_secs",
        "control.stop_settle_secs",
        "control.verify_attempts",
        "control.verify_spacing_secs",
        "control.restart_gap_secs",
        "self_heal",
        "self_heal.enabled",
        "self_heal.down_threshold_minutes",
        "self_heal.cooldown_minutes",
        "self_heal.stale_healing_minutes",
        "snapshots",
        "snapshots.root",
        "snapshots.source_root",
        "snapshots.subtrees",
        "snapshots.config_file",
        "snapshots.max_age_days",
        "snapshots.max_count",
        "snapshots.archive_timeout_secs",
        "notify",
        "notify.telegram_bot_token",
        "notify.telegram_chat_id",
        "api",
        "api.bind",
    ];
    keys.iter().copied().collect()
}

/// Collect every dotted key path present in a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

/// Warn about keys that do not map to any config field.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        // parse errors are reported by serde afterwards
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

/// Range and consistency checks. Returns every violation found.
pub fn validate_ranges(config: &WardenConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.monitor.interval_secs == 0 {
        errors.push("monitor.interval_secs must be > 0".to_string());
    }
    if !(1..=60).contains(&config.monitor.probe_timeout_secs) {
        errors.push(format!(
            "monitor.probe_timeout_secs = {} is outside 1..=60",
            config.monitor.probe_timeout_secs
        ));
    }
    if config.gateway.cli.is_empty() {
        errors.push("gateway.cli must name at least the program".to_string());
    }

    let d = &config.disk;
    if !(d.warning_percent <= d.low_percent && d.low_percent <= d.critical_percent && d.critical_percent <= 100) {
        errors.push(format!(
            "disk thresholds must satisfy warning ({}) <= low ({}) <= critical ({}) <= 100",
            d.warning_percent, d.low_percent, d.critical_percent
        ));
    }

    if !(config.load.warn_ratio > 0.0 && config.load.warn_ratio.is_finite()) {
        errors.push(format!("load.warn_ratio = {} must be positive", config.load.warn_ratio));
    }
    if !(config.load.crit_ratio > 0.0 && config.load.crit_ratio.is_finite()) {
        errors.push(format!("load.crit_ratio = {} must be positive", config.load.crit_ratio));
    }

    if config.control.verify_attempts == 0 {
        errors.push("control.verify_attempts must be >= 1".to_string());
    }

    let h = &config.self_heal;
    if h.down_threshold_minutes < 0 || h.cooldown_minutes < 0 || h.stale_healing_minutes <= 0 {
        errors.push("self_heal minute values must be non-negative (stale_healing_minutes > 0)".to_string());
    }
    for (key, value) in [
        ("self_heal.down_threshold_minutes", h.down_threshold_minutes),
        ("self_heal.cooldown_minutes", h.cooldown_minutes),
        ("self_heal.stale_healing_minutes", h.stale_healing_minutes),
    ] {
        if value > MAX_MINUTES {
            errors.push(format!("{key} = {value} exceeds {MAX_MINUTES} (one year)"));
        }
    }

    let s = &config.snapshots;
    if s.max_age_days > MAX_AGE_DAYS {
        errors.push(format!("snapshots.max_age_days = {} exceeds {MAX_AGE_DAYS}", s.max_age_days));
    }
    if s.max_count == 0 {
        errors.push("snapshots.max_count must be >= 1".to_string());
    }
    if s.subtrees.is_empty() {
        errors.push("snapshots.subtrees must list at least one subtree".to_string());
    }
    for name in s.subtrees.iter().chain(std::iter::once(&s.config_file)) {
        if !is_plain_name(name) {
            errors.push(format!("snapshots entry '{name}' must be a plain file or directory name"));
        }
    }

    errors
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("abc", "abd"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[self_heal]\ncooldwn_minutes = 5\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "self_heal.cooldwn_minutes");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("self_heal.cooldown_minutes"));
    }

    #[test]
    fn test_valid_keys_produce_zero_warnings() {
        let raw = r#"
[monitor]
interval_secs = 300

[snapshots]
max_count = 5
subtrees = ["agents"]
"#;
        assert!(validate_unknown_keys(raw).is_empty());
    }

    #[test]
    fn test_defaults_pass_range_checks() {
        assert!(validate_ranges(&WardenConfig::default()).is_empty());
    }

    #[test]
    fn test_range_violations_are_collected() {
        let mut config = WardenConfig::default();
        config.monitor.interval_secs = 0;
        config.snapshots.max_count = 0;
        config.snapshots.subtrees = vec!["../etc".to_string()];
        let errors = validate_ranges(&config);
        assert_eq!(errors.len(), 3, "{errors:?}");
    }
}
