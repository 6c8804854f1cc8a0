//! Shared configuration and clock helpers used across the core and the daemon.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::tier::ResourcePolicy;

/// Where inference requests are allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputeMode {
    LocalOnly,
    RemoteOnly,
    /// Pick local or remote per request based on the resolved tier.
    #[default]
    Adaptive,
}

impl ComputeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeMode::LocalOnly => "LOCAL_ONLY",
            ComputeMode::RemoteOnly => "REMOTE_ONLY",
            ComputeMode::Adaptive => "ADAPTIVE",
        }
    }

    /// Unknown or empty values fall back to [`ComputeMode::Adaptive`].
    pub fn from_str(s: &str) -> Self {
        match s.trim() {
            s if s.eq_ignore_ascii_case("local_only") => ComputeMode::LocalOnly,
            s if s.eq_ignore_ascii_case("remote_only") => ComputeMode::RemoteOnly,
            _ => ComputeMode::Adaptive,
        }
    }
}

impl<'de> Deserialize<'de> for ComputeMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ComputeMode::from_str(&raw))
    }
}

/// Onboarding answers used to seed a persona when nothing is persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingToggles {
    pub direct: bool,
    pub technical: bool,
    pub concise: bool,
}

impl Default for OnboardingToggles {
    fn default() -> Self {
        Self {
            direct: true,
            technical: true,
            concise: true,
        }
    }
}

/// Which [`TelemetrySource`](crate::TelemetrySource) the daemon should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySourceKind {
    #[default]
    Sysfs,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub source: TelemetrySourceKind,
    /// Root of the sysfs mount (`/sys` on device; a temp dir in tests).
    pub sysfs_root: String,
    /// Period of the caller-driven stress re-check.
    pub recheck_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: TelemetrySourceKind::Sysfs,
            sysfs_root: "/sys".to_string(),
            recheck_interval_secs: 30,
        }
    }
}

/// Application configuration. Constructed explicitly and passed to the components
/// that need it; load from TOML or env with [`CoreConfig::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Backend used when the compute mode routes a request off-device.
    pub backend_url: String,
    #[serde(default)]
    pub compute_mode: ComputeMode,
    /// Base directory for the sled persona store.
    pub storage_path: String,
    #[serde(default)]
    pub onboarding: OnboardingToggles,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub policy: ResourcePolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://10.0.2.2:8000".to_string(),
            compute_mode: ComputeMode::Adaptive,
            storage_path: "./data".to_string(),
            onboarding: OnboardingToggles::default(),
            telemetry: TelemetryConfig::default(),
            policy: ResourcePolicy::default(),
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: env `TUDA_CONFIG` path >
    /// `config/overlay.toml` > defaults, with `TUDA_*` variables (nested keys separated
    /// by `__`) on top.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("TUDA_CONFIG").unwrap_or_else(|_| "config/overlay".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`CoreConfig::load`] with an explicit file path (extension optional).
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("backend_url", defaults.backend_url.as_str())?
            .set_default("compute_mode", defaults.compute_mode.as_str())?
            .set_default("storage_path", defaults.storage_path.as_str())?;

        let builder = builder.add_source(config::File::from(path).required(false));

        let built = builder
            .add_source(
                config::Environment::with_prefix("TUDA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }

    /// Location of the sled database holding the persona record.
    pub fn persona_store_path(&self) -> PathBuf {
        Path::new(&self.storage_path).join("persona_store")
    }
}

/// Current wall-clock time as epoch milliseconds (0 if the clock is before the epoch).
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn compute_mode_falls_back_to_adaptive() {
        assert_eq!(ComputeMode::from_str("LOCAL_ONLY"), ComputeMode::LocalOnly);
        assert_eq!(ComputeMode::from_str("remote_only"), ComputeMode::RemoteOnly);
        assert_eq!(ComputeMode::from_str("turbo"), ComputeMode::Adaptive);
        assert_eq!(ComputeMode::from_str(""), ComputeMode::Adaptive);
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load_from(&dir.path().join("absent")).unwrap();
        assert_eq!(config.backend_url, "http://10.0.2.2:8000");
        assert_eq!(config.compute_mode, ComputeMode::Adaptive);
        assert_eq!(config.storage_path, "./data");
        assert_eq!(config.onboarding, OnboardingToggles::default());
        assert_eq!(config.telemetry.recheck_interval_secs, 30);
        assert_eq!(config.policy, ResourcePolicy::default());
    }

    #[test]
    fn load_from_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
backend_url = "http://backend.local:9000"
compute_mode = "LOCAL_ONLY"
storage_path = "/tmp/overlay"

[onboarding]
direct = false

[telemetry]
source = "simulated"
recheck_interval_secs = 5

[policy]
slow_latency_ms = 1200.0
"#
        )
        .unwrap();

        let config = CoreConfig::load_from(&path).unwrap();
        assert_eq!(config.backend_url, "http://backend.local:9000");
        assert_eq!(config.compute_mode, ComputeMode::LocalOnly);
        assert!(!config.onboarding.direct);
        assert!(config.onboarding.technical);
        assert_eq!(config.telemetry.source, TelemetrySourceKind::Simulated);
        assert_eq!(config.telemetry.sysfs_root, "/sys");
        assert_eq!(config.telemetry.recheck_interval_secs, 5);
        assert_eq!(config.policy.slow_latency_ms, 1200.0);
        assert_eq!(config.policy.low_battery_percent, 20);
        assert_eq!(config.persona_store_path(), PathBuf::from("/tmp/overlay/persona_store"));
    }
}
