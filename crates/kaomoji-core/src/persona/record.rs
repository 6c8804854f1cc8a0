//! Persisted persona aggregate and its document encoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{
    DEFAULT_TRUST_SCORE, EXPERIENCE_CAPACITY, LESSON_CAPACITY, STORAGE_BUDGET_CHARS,
    TRUST_HISTORY_CAPACITY,
};
use crate::observation::{ObservationEntry, ObservationLog};

/// Named tone preferences (directness, warmth, ...) each in `[0.0, 1.0]`.
/// Keys are an open set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToneProfile(BTreeMap<String, f32>);

impl ToneProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f32> {
        self.0.get(key).copied()
    }

    /// Sets `key`, clamping the value into `[0.0, 1.0]`. Non-finite values are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: f32) {
        if value.is_finite() {
            self.0.insert(key.into(), value.clamp(0.0, 1.0));
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: f32) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

}

/// One signed trust adjustment. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEvent {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub delta: f32,
    /// Unix timestamp (milliseconds) of the adjustment.
    #[serde(default)]
    pub timestamp: i64,
}

/// Permanent achievement flags. Ordering is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Milestone {
    /// The persona adapted to a user correction, or trust reached 50.
    FirstCorrectionAdapted,
    /// Trust reached the integrated tier gate (70).
    MonthZeroBreach,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::FirstCorrectionAdapted => "FIRST_CORRECTION_ADAPTED",
            Milestone::MonthZeroBreach => "MONTH_ZERO_BREACH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "FIRST_CORRECTION_ADAPTED" => Some(Milestone::FirstCorrectionAdapted),
            "MONTH_ZERO_BREACH" => Some(Milestone::MonthZeroBreach),
            _ => None,
        }
    }
}

/// The persisted persona aggregate.
///
/// Invariants after every mutator returns: `0 <= trust_score <= 100`,
/// `experience_log.len() <= 50`, `learned_lessons.len() <= 20`,
/// `trust_history.len() <= 200`, and the experience log plus lessons fit
/// [`STORAGE_BUDGET_CHARS`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaRecord {
    pub(super) tone_profile: ToneProfile,
    pub(super) trust_score: f32,
    pub(super) milestones: BTreeSet<Milestone>,
    pub(super) trust_history: Vec<TrustEvent>,
    pub(super) experience_log: Vec<String>,
    pub(super) learned_lessons: Vec<String>,
    pub(super) observations: ObservationLog,
}

impl Default for PersonaRecord {
    fn default() -> Self {
        Self {
            tone_profile: ToneProfile::new(),
            trust_score: DEFAULT_TRUST_SCORE,
            milestones: BTreeSet::new(),
            trust_history: Vec::new(),
            experience_log: Vec::new(),
            learned_lessons: Vec::new(),
            observations: ObservationLog::new(),
        }
    }
}

impl PersonaRecord {
    /// Seeds a persona from the three onboarding toggles. Deterministic for a given triple.
    ///
    /// Directness and conciseness reinforce each other when both are chosen;
    /// a technical persona runs cooler (lower warmth).
    pub fn seed(direct: bool, technical: bool, concise: bool) -> Self {
        let directness = match (direct, concise) {
            (true, true) => 0.85,
            (true, false) => 0.75,
            (false, true) => 0.65,
            (false, false) => 0.5,
        };
        let conciseness = match (direct, concise) {
            (true, true) => 0.85,
            (false, true) => 0.75,
            (true, false) => 0.55,
            (false, false) => 0.4,
        };
        let technicality = if technical { 0.8 } else { 0.3 };
        let warmth = if technical { 0.3 } else { 0.55 };

        Self {
            tone_profile: ToneProfile::new()
                .with("directness", directness)
                .with("conciseness", conciseness)
                .with("technicality", technicality)
                .with("warmth", warmth),
            ..Self::default()
        }
    }

    /// Replaces the trust score (clamped to `[0, 100]`) without recording history.
    /// Meant for imports and fixtures; feedback goes through `increase_trust`/`decay_trust`.
    pub fn with_trust_score(mut self, score: f32) -> Self {
        self.trust_score = clamp_score(score);
        self
    }

    pub fn tone_profile(&self) -> &ToneProfile {
        &self.tone_profile
    }

    pub fn trust_score(&self) -> f32 {
        self.trust_score
    }

    /// Earned milestones in display order.
    pub fn milestones(&self) -> Vec<Milestone> {
        self.milestones.iter().copied().collect()
    }

    pub fn has_milestone(&self, milestone: Milestone) -> bool {
        self.milestones.contains(&milestone)
    }

    /// Trust events, oldest first.
    pub fn trust_history(&self) -> &[TrustEvent] {
        &self.trust_history
    }

    pub fn experience_log(&self) -> &[String] {
        &self.experience_log
    }

    pub fn learned_lessons(&self) -> &[String] {
        &self.learned_lessons
    }

    pub fn observations(&self) -> &ObservationLog {
        &self.observations
    }

    /// Serializes to JSON bytes for the persona store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a persisted document, defaulting every missing or malformed field.
    ///
    /// Returns `None` only when the bytes are not a JSON object at all; callers treat
    /// that the same as an absent record. `now_ms` stamps any observation produced
    /// while normalizing an oversized document.
    pub fn from_bytes(bytes: &[u8], now_ms: i64) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        let doc = value.as_object()?;
        Some(Self::from_document(doc, now_ms))
    }

    fn from_document(doc: &Map<String, Value>, now_ms: i64) -> Self {
        let mut tone_profile = ToneProfile::new();
        if let Some(tone) = doc.get("toneProfile").and_then(Value::as_object) {
            for (key, value) in tone {
                if let Some(v) = value.as_f64() {
                    tone_profile.set(key.clone(), v as f32);
                }
            }
        }

        let trust_score = doc
            .get("trustScore")
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_TRUST_SCORE);

        let mut milestones = BTreeSet::new();
        for tag in string_list(doc, "milestones") {
            match Milestone::from_str(&tag) {
                Some(m) => {
                    milestones.insert(m);
                }
                None => tracing::warn!(
                    target: "kaomoji::persona",
                    tag = %tag,
                    "Dropping unknown milestone tag"
                ),
            }
        }

        let trust_history = object_list::<TrustEvent>(doc, "trustHistory");
        let observations: ObservationLog = object_list::<ObservationEntry>(doc, "observations")
            .into_iter()
            .collect();

        let mut record = Self {
            tone_profile,
            trust_score,
            milestones,
            trust_history,
            experience_log: string_list(doc, "experienceLog"),
            learned_lessons: string_list(doc, "learnedLessons"),
            observations,
        };
        record.normalize(now_ms);
        record
    }

    /// Re-establishes every bound. Decoded documents may come from older builds with
    /// different caps.
    pub(super) fn normalize(&mut self, now_ms: i64) {
        self.trust_score = clamp_score(self.trust_score);
        truncate_front(&mut self.trust_history, TRUST_HISTORY_CAPACITY);
        truncate_front(&mut self.learned_lessons, LESSON_CAPACITY);
        self.observations.enforce_capacity();
        if self.experience_log.len() > EXPERIENCE_CAPACITY {
            self.compact(now_ms);
        }
        self.enforce_storage_budget();
    }

    /// Character footprint of the experience log plus learned lessons, each list
    /// counted as its newline-joined text.
    pub fn memory_footprint_chars(&self) -> usize {
        joined_chars(&self.experience_log) + joined_chars(&self.learned_lessons)
    }

    /// Evicts the oldest experience entries, then the oldest lessons, until the
    /// footprint fits [`STORAGE_BUDGET_CHARS`].
    pub(super) fn enforce_storage_budget(&mut self) {
        while self.memory_footprint_chars() > STORAGE_BUDGET_CHARS
            && !self.experience_log.is_empty()
        {
            self.experience_log.remove(0);
        }
        while self.memory_footprint_chars() > STORAGE_BUDGET_CHARS
            && !self.learned_lessons.is_empty()
        {
            self.learned_lessons.remove(0);
        }
    }
}

pub(super) fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        return DEFAULT_TRUST_SCORE;
    }
    score.clamp(0.0, 100.0)
}

pub(super) fn truncate_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

fn joined_chars(items: &[String]) -> usize {
    if items.is_empty() {
        return 0;
    }
    items.iter().map(|s| s.chars().count()).sum::<usize>() + items.len() - 1
}

fn string_list(doc: &Map<String, Value>, key: &str) -> Vec<String> {
    doc.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn object_list<T: serde::de::DeserializeOwned>(doc: &Map<String, Value>, key: &str) -> Vec<T> {
    doc.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<T>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
