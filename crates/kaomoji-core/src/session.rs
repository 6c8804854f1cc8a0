//! Single writer for the persona: holds the current record, swaps it after each
//! mutation and persists the new value before releasing the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::persona::{PersonaEvent, PersonaRecord};
use crate::shared::OnboardingToggles;
use crate::store::{load_or_seed, PersonaStore, StoreError};
use crate::telemetry::TelemetrySource;
use crate::tier::{Decision, TierResolver};

const STRESS_ADJUSTMENT: &str = "Adjustment: Downshifting to Tier 1 heuristics.";

pub struct PersonaSession<S: PersonaStore> {
    store: S,
    current: Mutex<PersonaRecord>,
    /// Whether the last resolved decision carried the slowdown notice.
    stressed: AtomicBool,
}

impl<S: PersonaStore> PersonaSession<S> {
    pub fn new(store: S, record: PersonaRecord) -> Self {
        Self {
            store,
            current: Mutex::new(record),
            stressed: AtomicBool::new(false),
        }
    }

    /// Loads the persisted persona (or seeds and saves one) and wraps it in a session.
    pub fn open(store: S, toggles: &OnboardingToggles, now_ms: i64) -> Result<Self, StoreError> {
        let record = load_or_seed(&store, toggles, now_ms)?;
        Ok(Self::new(store, record))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the current record.
    pub fn current(&self) -> PersonaRecord {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs one mutation and saves the result. Updates are serialized, so at most one
    /// write is in flight. If the save fails the new state is still kept in memory and
    /// the error is returned; the next successful save persists it.
    pub fn update<F>(&self, mutate: F) -> Result<PersonaRecord, StoreError>
    where
        F: FnOnce(PersonaRecord) -> PersonaRecord,
    {
        let mut guard = self.current.lock().map_err(|_| StoreError::Poisoned)?;
        let next = mutate(guard.clone());
        *guard = next.clone();

        if let Err(e) = self.store.save(&guard) {
            tracing::warn!(
                target: "kaomoji::session",
                error = %e,
                "Persona save failed; keeping in-memory state"
            );
            return Err(e);
        }
        Ok(next)
    }

    pub fn apply(&self, event: PersonaEvent, now_ms: i64) -> Result<PersonaRecord, StoreError> {
        self.update(|record| record.apply(event, now_ms))
    }

    /// Resolves the tier for the current record against a fresh telemetry snapshot.
    ///
    /// The first stressed decision after an unstressed one is written to the
    /// observation log; repeats while the device stays stressed are not.
    pub fn resolve_tier(
        &self,
        resolver: &TierResolver,
        telemetry: &dyn TelemetrySource,
        now_ms: i64,
    ) -> Decision {
        let device = telemetry.current_snapshot();
        let record = self.current();
        let decision = resolver.resolve(&record, &device);
        tracing::info!(
            target: "kaomoji::session",
            tier = decision.tier.as_str(),
            reason = %decision.reason,
            notice = decision.notice.as_deref().unwrap_or(""),
            "Tier resolved"
        );

        let stressed = decision.notice.is_some();
        let was_stressed = self.stressed.swap(stressed, Ordering::SeqCst);
        if stressed && !was_stressed {
            let message = format!(
                "Observation: Device stress detected (battery={}%, thermal={}).",
                device.battery_percent,
                device.thermal_state.as_str()
            );
            let recorded = self.update(|r| r.with_observation(message, STRESS_ADJUSTMENT, now_ms));
            if let Err(e) = recorded {
                tracing::warn!(
                    target: "kaomoji::session",
                    error = %e,
                    "Stress observation not persisted"
                );
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{Milestone, TrustSignal};
    use crate::store::MemoryPersonaStore;
    use crate::telemetry::{DeviceSnapshot, SimulatedTelemetry, ThermalState};
    use crate::tier::{IntelligenceTier, ResourcePolicy, SLOWDOWN_NOTICE};
    use std::sync::Arc;

    /// Rejects every save while `fail` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryPersonaStore,
        fail: AtomicBool,
    }

    impl PersonaStore for FlakyStore {
        fn load(&self, now_ms: i64) -> Result<Option<PersonaRecord>, StoreError> {
            self.inner.load(now_ms)
        }

        fn save(&self, record: &PersonaRecord) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Poisoned);
            }
            self.inner.save(record)
        }
    }

    type Fixture = (PersonaSession<MemoryPersonaStore>, TierResolver, SimulatedTelemetry);

    fn trusted_on_charger() -> Fixture {
        let record = PersonaRecord::default().with_trust_score(90.0);
        let charging = DeviceSnapshot::new(95, true, ThermalState::Cool);
        (
            PersonaSession::new(MemoryPersonaStore::new(), record),
            TierResolver::new(ResourcePolicy::default()),
            SimulatedTelemetry::with_snapshot(charging),
        )
    }

    #[test]
    fn every_mutation_is_persisted() {
        let toggles = OnboardingToggles::default();
        let session = PersonaSession::open(MemoryPersonaStore::new(), &toggles, 0).unwrap();
        let signal = TrustSignal::UserCorrectionAdapted;
        let after = session.apply(PersonaEvent::Signal { signal }, 10).unwrap();

        assert_eq!(after.trust_score(), 33.0);
        assert!(after.has_milestone(Milestone::FirstCorrectionAdapted));
        assert_eq!(session.current(), after);
        assert_eq!(session.store().load(20).unwrap(), Some(after));
    }

    #[test]
    fn failed_save_keeps_in_memory_state() {
        let store = FlakyStore::default();
        let session = PersonaSession::open(store, &OnboardingToggles::default(), 0).unwrap();
        session.store().fail.store(true, Ordering::SeqCst);

        let result = session.apply(
            PersonaEvent::IncreaseTrust {
                amount: 10.0,
                reason: "accepted".to_string(),
            },
            5,
        );
        assert!(matches!(result, Err(StoreError::Poisoned)));
        assert_eq!(session.current().trust_score(), 40.0);
        assert_eq!(session.store().load(6).unwrap().unwrap().trust_score(), 30.0);

        // The next successful save catches the store up.
        session.store().fail.store(false, Ordering::SeqCst);
        let entry = "tone: ok".to_string();
        session.apply(PersonaEvent::Experience { entry }, 7).unwrap();
        assert_eq!(session.store().load(8).unwrap().unwrap().trust_score(), 40.0);
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let session = Arc::new(PersonaSession::new(
            MemoryPersonaStore::new(),
            PersonaRecord::default(),
        ));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for j in 0..5 {
                        session.update(|r| r.increase_trust(1.0, "accepted", i * 10 + j)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = session.current();
        assert_eq!(record.trust_score(), 70.0);
        assert_eq!(record.trust_history().len(), 40);
        assert_eq!(session.store().load(0).unwrap(), Some(record));
    }

    #[test]
    fn resolve_tier_reads_live_telemetry() {
        let (session, resolver, telemetry) = trusted_on_charger();

        assert_eq!(session.resolve_tier(&resolver, &telemetry, 0).tier, IntelligenceTier::Tier3);

        telemetry.set_simulated_stress(Some(DeviceSnapshot::new(12, false, ThermalState::Normal)));
        let decision = session.resolve_tier(&resolver, &telemetry, 1);
        assert_eq!(decision.tier, IntelligenceTier::Tier1);
        assert_eq!(decision.notice.as_deref(), Some(SLOWDOWN_NOTICE));
    }

    #[test]
    fn stress_onset_is_observed_once() {
        let (session, resolver, telemetry) = trusted_on_charger();

        session.resolve_tier(&resolver, &telemetry, 100);
        assert!(session.current().observations().is_empty());

        telemetry.set_simulated_stress(Some(DeviceSnapshot::new(12, false, ThermalState::High)));
        session.resolve_tier(&resolver, &telemetry, 200);
        let record = session.current();
        assert_eq!(record.observations().len(), 1);
        let entry = record.observations().latest().unwrap();
        assert_eq!(
            entry.message,
            "Observation: Device stress detected (battery=12%, thermal=HIGH)."
        );
        assert_eq!(entry.adjustment, STRESS_ADJUSTMENT);
        assert_eq!(entry.timestamp, 200);
        assert_eq!(session.store().load(0).unwrap(), Some(record));

        // Staying stressed adds nothing; recovering and stressing again adds one more.
        session.resolve_tier(&resolver, &telemetry, 300);
        assert_eq!(session.current().observations().len(), 1);
        telemetry.set_simulated_stress(None);
        session.resolve_tier(&resolver, &telemetry, 400);
        telemetry.set_simulated_stress(Some(DeviceSnapshot::new(9, false, ThermalState::Normal)));
        session.resolve_tier(&resolver, &telemetry, 500);
        assert_eq!(session.current().observations().len(), 2);
    }
}
