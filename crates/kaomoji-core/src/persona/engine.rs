//! Trust mutation, milestone rules, experience compaction and preference decay.

use serde::{Deserialize, Serialize};

use super::compaction::compact_experiences;
use super::record::{clamp_score, truncate_front, Milestone, PersonaRecord, TrustEvent};
use super::{
    CORRECTION_TRUST_GATE, DEFAULT_HALF_LIFE_DAYS, EXPERIENCE_CAPACITY, INTEGRATED_TRUST_GATE,
    LESSON_CAPACITY, NEUTRAL_TONE, TRUST_HISTORY_CAPACITY,
};

const MS_PER_DAY: f64 = 1000.0 * 60.0 * 60.0 * 24.0;

/// Feedback signals with fixed trust weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSignal {
    /// User confirmed an analysis (+2).
    UserConfirmedAnalysis,
    /// User corrected the assistant and the correction was adopted (+3).
    UserCorrectionAdapted,
    /// Assistant flagged something that was fine (-2).
    FalsePositive,
    /// User rejected an overreaching suggestion (-5).
    OverreachRejected,
}

impl TrustSignal {
    /// Signed trust delta for this signal.
    pub fn delta(&self) -> f32 {
        match self {
            TrustSignal::UserConfirmedAnalysis => 2.0,
            TrustSignal::UserCorrectionAdapted => 3.0,
            TrustSignal::FalsePositive => -2.0,
            TrustSignal::OverreachRejected => -5.0,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            TrustSignal::UserConfirmedAnalysis => "User confirmed analysis",
            TrustSignal::UserCorrectionAdapted => "User correction adapted",
            TrustSignal::FalsePositive => "False positive",
            TrustSignal::OverreachRejected => "Overreach rejected",
        }
    }
}

/// Everything the UI can ask the engine to do, as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersonaEvent {
    IncreaseTrust { amount: f32, reason: String },
    DecayTrust { amount: f32, reason: String },
    Signal { signal: TrustSignal },
    Experience { entry: String },
    PreferenceHalfLife {
        reference_ms: i64,
        #[serde(default = "default_preference_key")]
        key: String,
        #[serde(default = "default_half_life_days")]
        half_life_days: f64,
    },
}

fn default_preference_key() -> String {
    "directness".to_string()
}

fn default_half_life_days() -> f64 {
    DEFAULT_HALF_LIFE_DAYS
}

/// Negative and NaN amounts are treated as zero so trust mutation stays total.
fn magnitude(amount: f32) -> f32 {
    if amount.is_nan() {
        0.0
    } else {
        amount.max(0.0)
    }
}

impl PersonaRecord {
    /// Applies one event. Pure: the same record, event and clock give the same result.
    pub fn apply(self, event: PersonaEvent, now_ms: i64) -> Self {
        match event {
            PersonaEvent::IncreaseTrust { amount, reason } => {
                self.increase_trust(amount, &reason, now_ms)
            }
            PersonaEvent::DecayTrust { amount, reason } => {
                self.decay_trust(amount, &reason, now_ms)
            }
            PersonaEvent::Signal { signal } => self.apply_signal(signal, now_ms),
            PersonaEvent::Experience { entry } => self.add_experience(entry, now_ms),
            PersonaEvent::PreferenceHalfLife {
                reference_ms,
                key,
                half_life_days,
            } => self.apply_preference_half_life(now_ms, reference_ms, &key, half_life_days),
        }
    }

    /// Raises trust by `amount` (clamped at 100) and re-evaluates milestones.
    pub fn increase_trust(mut self, amount: f32, reason: &str, now_ms: i64) -> Self {
        let amount = magnitude(amount);
        self.adjust_trust(amount, reason, now_ms);
        self.observations.record(
            "Observation: Trust increased due to validated interaction.",
            format!("Adjustment: Ledger noted '{}'.", reason),
            now_ms,
        );
        self.unlock_for_reason(reason, now_ms);
        self.unlock_for_score(now_ms);
        self
    }

    /// Lowers trust by `amount` (clamped at 0). Earned milestones are never revoked.
    pub fn decay_trust(mut self, amount: f32, reason: &str, now_ms: i64) -> Self {
        let amount = magnitude(amount);
        self.adjust_trust(-amount, reason, now_ms);
        self.observations.record(
            "Observation: User rejection or false positive detected.",
            format!("Adjustment: Reduced trust confidence because '{}'.", reason),
            now_ms,
        );
        self.unlock_for_reason(reason, now_ms);
        self
    }

    pub fn apply_signal(self, signal: TrustSignal, now_ms: i64) -> Self {
        let delta = signal.delta();
        if delta >= 0.0 {
            self.increase_trust(delta, signal.reason(), now_ms)
        } else {
            self.decay_trust(-delta, signal.reason(), now_ms)
        }
    }

    /// Trust is high enough for TIER_3.
    pub fn can_use_integrated_tier(&self) -> bool {
        self.trust_score >= INTEGRATED_TRUST_GATE
    }

    fn adjust_trust(&mut self, delta: f32, reason: &str, now_ms: i64) {
        let before = self.trust_score;
        self.trust_score = clamp_score(self.trust_score + delta);
        self.trust_history.push(TrustEvent {
            reason: reason.to_string(),
            delta,
            timestamp: now_ms,
        });
        truncate_front(&mut self.trust_history, TRUST_HISTORY_CAPACITY);
        tracing::debug!(
            target: "kaomoji::persona",
            delta,
            before,
            after = self.trust_score,
            reason,
            "Trust adjusted"
        );
    }

    fn unlock_for_score(&mut self, now_ms: i64) {
        if self.trust_score >= CORRECTION_TRUST_GATE {
            self.unlock(Milestone::FirstCorrectionAdapted, now_ms);
        }
        if self.trust_score >= INTEGRATED_TRUST_GATE {
            self.unlock(Milestone::MonthZeroBreach, now_ms);
        }
    }

    fn unlock_for_reason(&mut self, reason: &str, now_ms: i64) {
        if reason.to_lowercase().contains("correction") {
            self.unlock(Milestone::FirstCorrectionAdapted, now_ms);
        }
    }

    fn unlock(&mut self, milestone: Milestone, now_ms: i64) {
        if self.milestones.insert(milestone) {
            tracing::info!(
                target: "kaomoji::persona",
                milestone = milestone.as_str(),
                "Milestone unlocked"
            );
            self.observations.record(
                format!("Observation: Milestone {} reached.", milestone.as_str()),
                "Adjustment: Milestone recorded permanently.",
                now_ms,
            );
        }
    }

    /// Appends an experience; compacts synchronously once the log exceeds
    /// [`EXPERIENCE_CAPACITY`], so the log never holds more than that on return.
    pub fn add_experience(mut self, entry: impl Into<String>, now_ms: i64) -> Self {
        self.experience_log.push(entry.into());
        if self.experience_log.len() > EXPERIENCE_CAPACITY {
            self.compact(now_ms);
        }
        self.enforce_storage_budget();
        self
    }

    /// Replaces the raw experience log with topic lessons. Lossy: raw entries are discarded.
    pub(super) fn compact(&mut self, now_ms: i64) {
        let lessons = compact_experiences(&self.experience_log);
        let considered = self.experience_log.len().min(EXPERIENCE_CAPACITY);
        let produced = lessons.len();

        self.learned_lessons.extend(lessons);
        truncate_front(&mut self.learned_lessons, LESSON_CAPACITY);
        self.experience_log.clear();

        tracing::info!(
            target: "kaomoji::persona",
            considered,
            lessons = produced,
            "Experience log compacted"
        );
        self.observations.record(
            "Observation: Experience log reached retention threshold.",
            format!(
                "Adjustment: Compacted {} events into {} learned lessons.",
                considered, produced
            ),
            now_ms,
        );
    }

    /// Relaxes one tone preference toward neutral (0.5) with exponential half-life decay:
    /// `new = 0.5 + (old - 0.5) * 0.5^(elapsed_days / half_life_days)`.
    ///
    /// No-op (and no observation) when no time has elapsed, the half-life is not
    /// positive, or the key is absent.
    pub fn apply_preference_half_life(
        mut self,
        now_ms: i64,
        reference_ms: i64,
        key: &str,
        half_life_days: f64,
    ) -> Self {
        // Reference times arrive from callers unchecked; saturate instead of overflowing.
        let elapsed_days = now_ms.saturating_sub(reference_ms) as f64 / MS_PER_DAY;
        if elapsed_days <= 0.0 || half_life_days.is_nan() || half_life_days <= 0.0 {
            return self;
        }
        let current = match self.tone_profile.get(key) {
            Some(v) => v,
            None => return self,
        };

        let factor = 0.5_f64.powf(elapsed_days / half_life_days);
        let next = NEUTRAL_TONE as f64 + (current as f64 - NEUTRAL_TONE as f64) * factor;
        self.tone_profile.set(key, next as f32);

        self.observations.record(
            format!("Observation: Preference drift decay evaluated for {}.", key),
            format!("Adjustment: Shifted {} toward neutral using half-life decay.", key),
            now_ms,
        );
        self
    }

    /// Appends a ledger entry without touching any other state.
    pub fn with_observation(
        mut self,
        message: impl Into<String>,
        adjustment: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        self.observations.record(message, adjustment, now_ms);
        self
    }

    /// Timestamp of the newest trust event whose reason mentions `needle`
    /// (case-insensitive). One way for callers to source a half-life reference time.
    pub fn last_event_mentioning(&self, needle: &str) -> Option<i64> {
        let needle = needle.to_lowercase();
        self.trust_history
            .iter()
            .rev()
            .find(|e| e.reason.to_lowercase().contains(&needle))
            .map(|e| e.timestamp)
    }
}
