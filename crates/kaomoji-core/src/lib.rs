//! kaomoji-core: trust and tier decision engine for the overlay assistant.
//!
//! The persona record is an immutable value: every mutator consumes it and returns the
//! next state. [`PersonaSession`] is the single writer that holds the current record,
//! swaps it after each mutation and persists it through a [`PersonaStore`].
//! [`TierResolver`] combines the trust-derived tier with live device telemetry.

mod observation;
mod persona;
mod session;
mod shared;
mod store;
mod telemetry;
mod tier;

pub use shared::{
    now_ms, ComputeMode, CoreConfig, OnboardingToggles, TelemetryConfig, TelemetrySourceKind,
};

pub use observation::{ObservationEntry, ObservationLog, OBSERVATION_CAPACITY};

pub use persona::{
    compact_experiences, topic_of, Milestone, PersonaEvent, PersonaRecord, ToneProfile, TrustEvent,
    TrustSignal, DEFAULT_HALF_LIFE_DAYS, DEFAULT_TRUST_SCORE, EXPERIENCE_CAPACITY,
    INTEGRATED_TRUST_GATE, LESSONS_PER_COMPACTION, LESSON_CAPACITY, STORAGE_BUDGET_CHARS,
    TRUST_HISTORY_CAPACITY,
};

pub use store::{
    load_or_seed, MemoryPersonaStore, PersonaStore, SledPersonaStore, StoreError, SEED_OBSERVATION,
};

pub use session::PersonaSession;

pub use telemetry::{
    DeviceSnapshot, LatencyWindow, SimulatedTelemetry, SysfsTelemetry, TelemetrySource,
    ThermalState, LATENCY_WINDOW_CAPACITY,
};

pub use tier::{
    Decision, IntelligenceTier, ResourcePolicy, TierResolver, SLOWDOWN_NOTICE, TIER_2_TRUST_GATE,
};
