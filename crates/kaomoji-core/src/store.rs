//! Persona persistence: a sled-backed store for the daemon and an in-memory one for tests.

use sled::Db;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

use crate::persona::PersonaRecord;
use crate::shared::OnboardingToggles;

const PERSONA_TREE: &str = "persona";
const PERSONA_KEY: &str = "persona_core";

pub const SEED_OBSERVATION: &str = "Persona seeded from onboarding toggles.";
const SEED_ADJUSTMENT: &str = "Adjustment: Tone profile initialized from onboarding.";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode persona record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("persona store lock poisoned")]
    Poisoned,
}

/// Durable home of the single persona record. Only serializes; never mutates.
pub trait PersonaStore: Send + Sync {
    /// `Ok(None)` when nothing usable is stored (absent or not a JSON object).
    fn load(&self, now_ms: i64) -> Result<Option<PersonaRecord>, StoreError>;

    fn save(&self, record: &PersonaRecord) -> Result<(), StoreError>;
}

/// Sled database holding the persona document under `persona/persona_core`.
pub struct SledPersonaStore {
    db: Db,
}

impl SledPersonaStore {
    /// Opens or creates the persona DB at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Raw stored document, if any.
    pub fn get_raw(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let tree = self.db.open_tree(PERSONA_TREE)?;
        Ok(tree.get(PERSONA_KEY.as_bytes())?.map(|iv| iv.to_vec()))
    }

    pub fn insert_raw(&self, value: &[u8]) -> Result<(), StoreError> {
        let tree = self.db.open_tree(PERSONA_TREE)?;
        let prev = tree.insert(PERSONA_KEY.as_bytes(), value)?;
        tree.flush()?;

        let is_update = prev.is_some();
        tracing::info!(
            target: "kaomoji::store",
            tree = PERSONA_TREE,
            key = PERSONA_KEY,
            bytes = value.len(),
            action = if is_update { "UPDATE" } else { "INSERT" },
            "Persona {} ({} bytes)",
            if is_update { "updated" } else { "inserted" },
            value.len()
        );
        Ok(())
    }
}

impl PersonaStore for SledPersonaStore {
    fn load(&self, now_ms: i64) -> Result<Option<PersonaRecord>, StoreError> {
        let bytes = match self.get_raw()? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let record = PersonaRecord::from_bytes(&bytes, now_ms);
        if record.is_none() {
            tracing::warn!(
                target: "kaomoji::store",
                bytes = bytes.len(),
                "Stored persona is not a JSON object; ignoring"
            );
        }
        Ok(record)
    }

    fn save(&self, record: &PersonaRecord) -> Result<(), StoreError> {
        let bytes = record.to_bytes()?;
        self.insert_raw(&bytes)
    }
}

/// Keeps the serialized document in memory, so tests exercise the same encode/decode path.
#[derive(Debug, Default)]
pub struct MemoryPersonaStore {
    bytes: RwLock<Option<Vec<u8>>>,
}

impl MemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loads a raw document, e.g. one written by an older build.
    pub fn with_raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: RwLock::new(Some(bytes.into())),
        }
    }

    pub fn raw(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes = self.bytes.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bytes.clone())
    }
}

impl PersonaStore for MemoryPersonaStore {
    fn load(&self, now_ms: i64) -> Result<Option<PersonaRecord>, StoreError> {
        let bytes = self.bytes.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bytes.as_deref().and_then(|b| PersonaRecord::from_bytes(b, now_ms)))
    }

    fn save(&self, record: &PersonaRecord) -> Result<(), StoreError> {
        let encoded = record.to_bytes()?;
        let mut bytes = self.bytes.write().map_err(|_| StoreError::Poisoned)?;
        *bytes = Some(encoded);
        Ok(())
    }
}

/// Loads the persisted persona, or seeds one from `toggles` and saves it immediately.
pub fn load_or_seed<S: PersonaStore + ?Sized>(
    store: &S,
    toggles: &OnboardingToggles,
    now_ms: i64,
) -> Result<PersonaRecord, StoreError> {
    if let Some(record) = store.load(now_ms)? {
        tracing::info!(
            target: "kaomoji::store",
            trust_score = record.trust_score(),
            milestones = record.milestones().len(),
            "Loaded persisted persona"
        );
        return Ok(record);
    }

    let record = PersonaRecord::seed(toggles.direct, toggles.technical, toggles.concise)
        .with_observation(SEED_OBSERVATION, SEED_ADJUSTMENT, now_ms);
    store.save(&record)?;
    tracing::info!(
        target: "kaomoji::store",
        direct = toggles.direct,
        technical = toggles.technical,
        concise = toggles.concise,
        "Seeded new persona"
    );
    Ok(record)
}
