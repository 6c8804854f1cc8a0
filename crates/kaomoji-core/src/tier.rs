//! Tier resolution: the more conservative of the trust tier and the resource tier wins.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::persona::PersonaRecord;
use crate::telemetry::{DeviceSnapshot, ThermalState};

/// Trust score at which TIER_2 unlocks.
pub const TIER_2_TRUST_GATE: f32 = 35.0;

/// Shown when the device itself forced a downgrade.
pub const SLOWDOWN_NOTICE: &str = "Slowing down to save your battery/cool your device.";

/// Ordered capability tiers; `Tier1` is the cheapest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntelligenceTier {
    #[serde(rename = "TIER_1")]
    Tier1 = 1,
    #[serde(rename = "TIER_2")]
    Tier2 = 2,
    #[serde(rename = "TIER_3")]
    Tier3 = 3,
}

impl IntelligenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntelligenceTier::Tier1 => "TIER_1",
            IntelligenceTier::Tier2 => "TIER_2",
            IntelligenceTier::Tier3 => "TIER_3",
        }
    }
}

impl fmt::Display for IntelligenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device thresholds for the resource tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Battery below this percentage forces TIER_1.
    pub low_battery_percent: u8,
    /// Rolling latency above this is "inferred stress" and forces TIER_1.
    pub stress_latency_ms: f64,
    /// Rolling latency above this forces TIER_1 unless the device is charging and cool.
    pub slow_latency_ms: f64,
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self {
            low_battery_percent: 20,
            stress_latency_ms: 2000.0,
            slow_latency_ms: 1500.0,
        }
    }
}

/// Outcome of one resolution, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub tier: IntelligenceTier,
    pub resource_tier: IntelligenceTier,
    pub trust_tier: IntelligenceTier,
    pub reason: String,
    /// Set only when battery or heat downgraded the resource tier.
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TierResolver {
    policy: ResourcePolicy,
}

impl TierResolver {
    pub fn new(policy: ResourcePolicy) -> Self {
        Self { policy }
    }

    fn device_constrained(&self, device: &DeviceSnapshot) -> bool {
        device.battery_percent < self.policy.low_battery_percent
            || device.thermal_state == ThermalState::High
    }

    pub fn resource_tier(&self, device: &DeviceSnapshot) -> IntelligenceTier {
        if self.device_constrained(device)
            || device.inferred_stress_high(self.policy.stress_latency_ms)
        {
            IntelligenceTier::Tier1
        } else if device.charging && device.thermal_state == ThermalState::Cool {
            IntelligenceTier::Tier3
        } else if device.avg_latency_ms > self.policy.slow_latency_ms {
            IntelligenceTier::Tier1
        } else {
            IntelligenceTier::Tier2
        }
    }

    pub fn trust_tier(&self, persona: &PersonaRecord) -> IntelligenceTier {
        if persona.can_use_integrated_tier() {
            IntelligenceTier::Tier3
        } else if persona.trust_score() >= TIER_2_TRUST_GATE {
            IntelligenceTier::Tier2
        } else {
            IntelligenceTier::Tier1
        }
    }

    /// Pure and deterministic: identical inputs always produce an identical [`Decision`].
    pub fn resolve(&self, persona: &PersonaRecord, device: &DeviceSnapshot) -> Decision {
        let resource_tier = self.resource_tier(device);
        let trust_tier = self.trust_tier(persona);
        let notice = self
            .device_constrained(device)
            .then(|| SLOWDOWN_NOTICE.to_string());

        Decision {
            tier: resource_tier.min(trust_tier),
            resource_tier,
            trust_tier,
            reason: format!(
                "resource={} trust={} trustScore={}",
                resource_tier,
                trust_tier,
                persona.trust_score()
            ),
            notice,
        }
    }
}
