//! Persona engine: trust score, tone profile, milestones and experience memory.
//!
//! [`PersonaRecord`] is the persisted aggregate. All mutators take the record by value
//! and return the next state, so the engine reduces to
//! `(PersonaRecord, PersonaEvent) -> PersonaRecord`.

mod compaction;
mod engine;
mod record;

pub use compaction::{compact_experiences, topic_of};
pub use engine::{PersonaEvent, TrustSignal};
pub use record::{Milestone, PersonaRecord, ToneProfile, TrustEvent};

/// Trust score a fresh persona starts with, and the fallback for documents missing one.
pub const DEFAULT_TRUST_SCORE: f32 = 30.0;

/// Trust score at which the integrated tier (TIER_3) unlocks.
pub const INTEGRATED_TRUST_GATE: f32 = 70.0;

/// Trust score at which FIRST_CORRECTION_ADAPTED unlocks without an explicit correction.
pub const CORRECTION_TRUST_GATE: f32 = 50.0;

/// Most recent trust events kept in the history.
pub const TRUST_HISTORY_CAPACITY: usize = 200;

/// Experience entries kept before compaction runs.
pub const EXPERIENCE_CAPACITY: usize = 50;

/// Learned lessons kept across compactions.
pub const LESSON_CAPACITY: usize = 20;

/// Topic buckets turned into lessons by one compaction.
pub const LESSONS_PER_COMPACTION: usize = 5;

/// Character budget shared by the experience log and learned lessons (5 MiB).
pub const STORAGE_BUDGET_CHARS: usize = 5 * 1024 * 1024;

/// Default half-life for preference drift back to neutral.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 180.0;

/// Neutral value every tone preference relaxes toward.
pub const NEUTRAL_TONE: f32 = 0.5;
