//! [`DigitalTwinStore`] – the single authoritative copy of equipment state.
//!
//! The store keeps the current snapshot behind an `RwLock<Arc<_>>`: readers
//! clone the `Arc` and never observe a half-applied update because a new
//! snapshot is fully built before the pointer is swapped.
//!
//! Writers and observer (de)registration are serialised by a second mutex
//! around the observer registry. Holding it across "commit + notify" gives
//! every observer the updates in store order, and lets
//! [`DigitalTwinStore::subscribe_with_snapshot`] hand a newcomer the current
//! snapshot without racing a concurrent update.
//!
//! Observers are called while that mutex is held, so they must not block
//! and must not call back into the registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use crane_types::validate::{telemetry_bool, telemetry_enum, telemetry_level};
use crane_types::{CraneError, DigitalTwinState, TelemetryRecord};
use serde_json::Value;
use tracing::{debug, warn};

/// Handle returned by [`DigitalTwinStore::subscribe`].
pub type ObserverId = u64;

/// Receives every snapshot committed by the store.
pub trait StateObserver: Send + Sync {
    /// Called once per committed update, in commit order.
    ///
    /// Returning [`CraneError::ChannelClosed`] deregisters the observer.
    /// Any other error is logged and the observer stays registered.
    fn on_state_change(&self, snapshot: &Arc<DigitalTwinState>) -> Result<(), CraneError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Observer registry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    next_id: ObserverId,
    observers: Vec<(ObserverId, Arc<dyn StateObserver>)>,
}

impl Registry {
    fn insert(&mut self, observer: Arc<dyn StateObserver>) -> ObserverId {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Deliver `snapshot` to each observer. A failing observer never stops
    /// delivery to the rest.
    fn notify(&mut self, snapshot: &Arc<DigitalTwinState>) {
        self.observers.retain(|(id, observer)| match observer.on_state_change(snapshot) {
            Ok(()) => true,
            Err(CraneError::ChannelClosed) => {
                debug!(observer = id, "observer gone; deregistering");
                false
            }
            Err(e) => {
                warn!(observer = id, error = %e, "observer failed to take snapshot");
                true
            }
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DigitalTwinStore
// ────────────────────────────────────────────────────────────────────────────

/// Owns the digital twin. Construct one per process and share it by `Arc`.
///
/// # Example
///
/// ```
/// use crane_twin::DigitalTwinStore;
/// use serde_json::json;
///
/// let store = DigitalTwinStore::new();
/// let record = json!({"trolleyLevel254": 120}).as_object().cloned().unwrap();
/// store.apply_update(record);
/// assert_eq!(store.current_state().trolley_level254, 120);
/// ```
pub struct DigitalTwinStore {
    current: RwLock<Arc<DigitalTwinState>>,
    registry: Mutex<Registry>,
}

impl DigitalTwinStore {
    /// A store holding [`DigitalTwinState::default`] and no observers.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(DigitalTwinState::default())),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// The most recently committed snapshot.
    pub fn current_state(&self) -> Arc<DigitalTwinState> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply a sparse telemetry record and notify every observer.
    ///
    /// Valid typed fields replace their counterparts; absent or invalid ones
    /// keep the prior value. `raw` and `ts` are always refreshed, even when
    /// no typed field was usable.
    pub fn apply_update(&self, record: TelemetryRecord) -> Arc<DigitalTwinState> {
        let mut registry = self.lock_registry();

        let prior = self.current_state();
        let next = Arc::new(next_state(&prior, record, Utc::now().timestamp_millis()));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);

        registry.notify(&next);
        next
    }

    /// Register `observer` for future updates.
    pub fn subscribe(&self, observer: Arc<dyn StateObserver>) -> ObserverId {
        self.lock_registry().insert(observer)
    }

    /// Deliver the current snapshot to `observer`, then register it, with no
    /// update able to slip in between.
    ///
    /// If the initial delivery fails the observer is not registered.
    pub fn subscribe_with_snapshot(
        &self,
        observer: Arc<dyn StateObserver>,
    ) -> Result<ObserverId, CraneError> {
        let mut registry = self.lock_registry();
        observer.on_state_change(&self.current_state())?;
        Ok(registry.insert(observer))
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut registry = self.lock_registry();
        let before = registry.observers.len();
        registry.observers.retain(|(existing, _)| *existing != id);
        registry.observers.len() != before
    }

    /// Whether `id` is still registered.
    pub fn is_subscribed(&self, id: ObserverId) -> bool {
        self.lock_registry().observers.iter().any(|(existing, _)| *existing == id)
    }

    pub fn observer_count(&self) -> usize {
        self.lock_registry().observers.len()
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DigitalTwinStore {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Merge
// ────────────────────────────────────────────────────────────────────────────

/// Pure merge of a telemetry record onto `prior`.
///
/// `now_ms` becomes the new `ts` unless the clock stepped backwards, in which
/// case the previous `ts` is kept so timestamps never decrease.
pub fn next_state(prior: &DigitalTwinState, record: TelemetryRecord, now_ms: i64) -> DigitalTwinState {
    let mut next = DigitalTwinState {
        boom: telemetry_enum(field(&record, "boom")).unwrap_or(prior.boom),
        trolley: telemetry_enum(field(&record, "trolley")).unwrap_or(prior.trolley),
        trolley_level254: telemetry_level(field(&record, "trolleyLevel254")).unwrap_or(prior.trolley_level254),
        light_level254: telemetry_level(field(&record, "lightLevel254")).unwrap_or(prior.light_level254),
        trolley_speed: telemetry_enum(field(&record, "trolleySpeed")).unwrap_or(prior.trolley_speed),
        control_mode: telemetry_enum(field(&record, "controlMode")).unwrap_or(prior.control_mode),
        dali_ok: telemetry_bool(field(&record, "daliOk")).unwrap_or(prior.dali_ok),
        raw: None,
        ts: Some(prior.ts.map_or(now_ms, |ts| ts.max(now_ms))),
    };
    next.raw = Some(record);
    next
}

/// Look up a telemetry field, treating an absent key like JSON `null`.
fn field<'r>(record: &'r TelemetryRecord, name: &str) -> &'r Value {
    static ABSENT: Value = Value::Null;
    record.get(name).unwrap_or(&ABSENT)
}
