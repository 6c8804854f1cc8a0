//! Device telemetry: battery, thermal state and the inference latency window.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

/// Latency samples kept for the rolling average.
pub const LATENCY_WINDOW_CAPACITY: usize = 10;

/// Battery percentage reported when the platform does not expose one.
const UNKNOWN_BATTERY_PERCENT: u8 = 50;

const POWER_SUPPLY_CANDIDATES: [&str; 3] = ["battery", "BAT0", "BAT1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermalState {
    Cool,
    #[default]
    #[serde(alias = "MODERATE")]
    Normal,
    High,
}

impl ThermalState {
    /// Battery temperature bands: `HIGH` from 43 °C, `COOL` within 0–34 °C, otherwise `NORMAL`.
    pub fn from_celsius(celsius: f32) -> Self {
        if celsius >= 43.0 {
            ThermalState::High
        } else if (0.0..=34.0).contains(&celsius) {
            ThermalState::Cool
        } else {
            ThermalState::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalState::Cool => "COOL",
            ThermalState::Normal => "NORMAL",
            ThermalState::High => "HIGH",
        }
    }
}

/// Point-in-time device state consumed by the tier resolver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(deserialize_with = "clamped_percent")]
    pub battery_percent: u8,
    pub charging: bool,
    pub thermal_state: ThermalState,
    /// Rolling average of recent inference latency; 0 when no samples exist.
    #[serde(default, deserialize_with = "non_negative_ms")]
    pub avg_latency_ms: f64,
}

fn clamped_percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, 100) as u8)
}

fn non_negative_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    Ok(if raw.is_finite() { raw.max(0.0) } else { 0.0 })
}

impl DeviceSnapshot {
    pub fn new(battery_percent: u8, charging: bool, thermal_state: ThermalState) -> Self {
        Self {
            battery_percent: battery_percent.min(100),
            charging,
            thermal_state,
            avg_latency_ms: 0.0,
        }
    }

    pub fn with_latency(mut self, avg_latency_ms: f64) -> Self {
        self.avg_latency_ms = if avg_latency_ms.is_finite() {
            avg_latency_ms.max(0.0)
        } else {
            0.0
        };
        self
    }

    /// Rolling inference latency is above `stress_latency_ms`.
    pub fn inferred_stress_high(&self, stress_latency_ms: f64) -> bool {
        self.avg_latency_ms > stress_latency_ms
    }
}

impl Default for DeviceSnapshot {
    /// Full battery, unplugged and cool.
    fn default() -> Self {
        Self::new(100, false, ThermalState::Cool)
    }
}

/// Fixed-capacity FIFO of inference latency samples.
#[derive(Debug, Default)]
pub struct LatencyWindow {
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, duration_ms: u64) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back(duration_ms);
        while samples.len() > LATENCY_WINDOW_CAPACITY {
            samples.pop_front();
        }
    }

    /// Mean of the retained samples, or 0 when empty.
    pub fn average(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64
    }

    pub fn samples(&self) -> Vec<u64> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

/// Source of live device state. Implementations must be shareable across threads.
pub trait TelemetrySource: Send + Sync {
    fn current_snapshot(&self) -> DeviceSnapshot;

    /// Feeds one inference duration into the rolling-average window.
    fn record_latency_sample(&self, duration_ms: u64);
}

/// Telemetry with an optional fixed override, for tests and demos.
#[derive(Debug, Default)]
pub struct SimulatedTelemetry {
    forced: RwLock<Option<DeviceSnapshot>>,
    latency: LatencyWindow,
}

impl SimulatedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: DeviceSnapshot) -> Self {
        let telemetry = Self::new();
        telemetry.set_simulated_stress(Some(snapshot));
        telemetry
    }

    /// Forces every subsequent snapshot to `snapshot`; `None` restores the default device.
    pub fn set_simulated_stress(&self, snapshot: Option<DeviceSnapshot>) {
        if let Ok(mut forced) = self.forced.write() {
            *forced = snapshot;
        }
    }
}

impl TelemetrySource for SimulatedTelemetry {
    fn current_snapshot(&self) -> DeviceSnapshot {
        let forced = self.forced.read().map(|g| *g).unwrap_or(None);
        forced.unwrap_or_else(|| DeviceSnapshot::default().with_latency(self.latency.average()))
    }

    fn record_latency_sample(&self, duration_ms: u64) {
        self.latency.record(duration_ms);
    }
}

/// Reads battery state from a Linux/Android sysfs `power_supply` node.
#[derive(Debug)]
pub struct SysfsTelemetry {
    root: PathBuf,
    latency: LatencyWindow,
}

impl SysfsTelemetry {
    /// `root` is the sysfs mount point, normally `/sys`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            latency: LatencyWindow::new(),
        }
    }

    fn battery_dir(&self) -> Option<PathBuf> {
        let base = self.root.join("class").join("power_supply");
        POWER_SUPPLY_CANDIDATES
            .iter()
            .map(|name| base.join(name))
            .find(|dir| dir.is_dir())
    }

    fn read_trimmed(dir: &Path, file: &str) -> Option<String> {
        std::fs::read_to_string(dir.join(file))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl TelemetrySource for SysfsTelemetry {
    fn current_snapshot(&self) -> DeviceSnapshot {
        let dir = match self.battery_dir() {
            Some(dir) => dir,
            None => {
                tracing::debug!(
                    target: "kaomoji::telemetry",
                    root = %self.root.display(),
                    "No power_supply battery node"
                );
                return DeviceSnapshot::new(UNKNOWN_BATTERY_PERCENT, false, ThermalState::Normal)
                    .with_latency(self.latency.average());
            }
        };

        let battery_percent = Self::read_trimmed(&dir, "capacity")
            .and_then(|s| s.parse::<i64>().ok())
            .map(|v| v.clamp(0, 100) as u8)
            .unwrap_or(UNKNOWN_BATTERY_PERCENT);

        let charging = matches!(
            Self::read_trimmed(&dir, "status").as_deref(),
            Some("Charging") | Some("Full")
        );

        // power_supply reports temperature in tenths of a degree Celsius.
        let thermal_state = Self::read_trimmed(&dir, "temp")
            .and_then(|s| s.parse::<i64>().ok())
            .map(|tenths| ThermalState::from_celsius(tenths as f32 / 10.0))
            .unwrap_or(ThermalState::Normal);

        let snapshot = DeviceSnapshot::new(battery_percent, charging, thermal_state)
            .with_latency(self.latency.average());
        tracing::debug!(
            target: "kaomoji::telemetry",
            battery = snapshot.battery_percent,
            charging = snapshot.charging,
            thermal = snapshot.thermal_state.as_str(),
            avg_latency_ms = snapshot.avg_latency_ms,
            "Telemetry snapshot"
        );
        snapshot
    }

    fn record_latency_sample(&self, duration_ms: u64) {
        self.latency.record(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_battery(root: &Path, name: &str, capacity: &str, status: &str, temp: Option<&str>) {
        let dir = root.join("class").join("power_supply").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("capacity"), capacity).unwrap();
        std::fs::write(dir.join("status"), status).unwrap();
        if let Some(temp) = temp {
            std::fs::write(dir.join("temp"), temp).unwrap();
        }
    }

    #[test]
    fn latency_window_keeps_last_ten_and_averages() {
        let window = LatencyWindow::new();
        assert_eq!(window.average(), 0.0);
        for ms in 1..=15u64 {
            window.record(ms * 100);
        }
        assert_eq!(window.samples(), (6..=15u64).map(|ms| ms * 100).collect::<Vec<_>>());
        assert_eq!(window.average(), 1050.0);
    }

    #[test]
    fn thermal_bands_match_battery_temperature() {
        assert_eq!(ThermalState::from_celsius(25.0), ThermalState::Cool);
        assert_eq!(ThermalState::from_celsius(34.0), ThermalState::Cool);
        assert_eq!(ThermalState::from_celsius(38.5), ThermalState::Normal);
        assert_eq!(ThermalState::from_celsius(43.0), ThermalState::High);
        assert_eq!(ThermalState::from_celsius(-0.1), ThermalState::Normal);
    }

    #[test]
    fn thermal_state_accepts_moderate_alias() {
        let state: ThermalState = serde_json::from_str("\"MODERATE\"").unwrap();
        assert_eq!(state, ThermalState::Normal);
    }

    #[test]
    fn decoded_snapshot_is_clamped_like_new() {
        let snapshot: DeviceSnapshot = serde_json::from_str(
            r#"{
                "battery_percent": 250,
                "charging": false,
                "thermal_state": "COOL",
                "avg_latency_ms": -40.0
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot, DeviceSnapshot::new(100, false, ThermalState::Cool));

        let low: DeviceSnapshot = serde_json::from_str(
            r#"{"battery_percent": -5, "charging": true, "thermal_state": "HIGH"}"#,
        )
        .unwrap();
        assert_eq!(low.battery_percent, 0);
        assert_eq!(low.avg_latency_ms, 0.0);
    }

    #[test]
    fn simulated_defaults_to_cool_full_battery_with_window_latency() {
        let telemetry = SimulatedTelemetry::new();
        telemetry.record_latency_sample(2400);
        telemetry.record_latency_sample(2600);
        let snapshot = telemetry.current_snapshot();
        assert_eq!(snapshot.battery_percent, 100);
        assert!(!snapshot.charging);
        assert_eq!(snapshot.thermal_state, ThermalState::Cool);
        assert_eq!(snapshot.avg_latency_ms, 2500.0);
    }

    #[test]
    fn simulated_override_wins_until_cleared() {
        let forced = DeviceSnapshot::new(10, false, ThermalState::High);
        let telemetry = SimulatedTelemetry::with_snapshot(forced);
        assert_eq!(telemetry.current_snapshot(), forced);
        telemetry.set_simulated_stress(None);
        assert_eq!(telemetry.current_snapshot(), DeviceSnapshot::default());
    }

    #[test]
    fn sysfs_reads_capacity_status_and_temperature() {
        let root = tempfile::tempdir().unwrap();
        write_battery(root.path(), "battery", "87\n", "Charging\n", Some("312\n"));
        let telemetry = SysfsTelemetry::new(root.path());
        telemetry.record_latency_sample(300);

        let snapshot = telemetry.current_snapshot();
        assert_eq!(snapshot.battery_percent, 87);
        assert!(snapshot.charging);
        assert_eq!(snapshot.thermal_state, ThermalState::Cool);
        assert_eq!(snapshot.avg_latency_ms, 300.0);
    }

    #[test]
    fn sysfs_full_counts_as_charging_and_hot_battery_is_high() {
        let root = tempfile::tempdir().unwrap();
        write_battery(root.path(), "BAT0", "100", "Full", Some("455"));
        let snapshot = SysfsTelemetry::new(root.path()).current_snapshot();
        assert!(snapshot.charging);
        assert_eq!(snapshot.thermal_state, ThermalState::High);
    }

    #[test]
    fn sysfs_falls_back_when_values_are_missing() {
        let root = tempfile::tempdir().unwrap();
        write_battery(root.path(), "battery", "garbage", "Discharging", None);
        let snapshot = SysfsTelemetry::new(root.path()).current_snapshot();
        assert_eq!(snapshot.battery_percent, UNKNOWN_BATTERY_PERCENT);
        assert!(!snapshot.charging);
        assert_eq!(snapshot.thermal_state, ThermalState::Normal);

        let empty = tempfile::tempdir().unwrap();
        let snapshot = SysfsTelemetry::new(empty.path()).current_snapshot();
        assert_eq!(snapshot.battery_percent, UNKNOWN_BATTERY_PERCENT);
        assert_eq!(snapshot.thermal_state, ThermalState::Normal);
    }
}
