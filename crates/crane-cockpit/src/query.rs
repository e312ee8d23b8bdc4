//! [`QueryFacade`] – read-only view over the twin and the bus connection.

use std::sync::Arc;

use crane_middleware::BusClient;
use crane_twin::DigitalTwinStore;
use crane_types::{DigitalTwinState, HealthStatus};

/// Answers `state` and `health` queries.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<DigitalTwinStore>,
    bus: Arc<dyn BusClient>,
}

impl QueryFacade {
    pub fn new(store: Arc<DigitalTwinStore>, bus: Arc<dyn BusClient>) -> Self {
        Self { store, bus }
    }

    /// The current twin snapshot.
    pub fn get_state(&self) -> Arc<DigitalTwinState> {
        self.store.current_state()
    }

    /// `busConnected` is read from the transport on every call.
    pub fn get_health(&self) -> HealthStatus {
        HealthStatus {
            ok: true,
            bus_connected: self.bus.is_connected(),
            bus_url: self.bus.url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crane_middleware::LoopbackBus;
    use serde_json::json;

    #[test]
    fn health_tracks_live_connection_flag() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(LoopbackBus::default());
        let query = QueryFacade::new(Arc::new(DigitalTwinStore::new()), bus.clone());

        assert_eq!(
            serde_json::to_value(query.get_health())?,
            json!({"ok": true, "busConnected": true, "busUrl": LoopbackBus::URL})
        );

        bus.set_connected(false);
        let health = query.get_health();
        assert!(health.ok);
        assert!(!health.bus_connected);
        assert_eq!(health.bus_url, LoopbackBus::URL);
        Ok(())
    }

    #[test]
    fn state_is_the_store_snapshot() {
        let store = Arc::new(DigitalTwinStore::new());
        let query = QueryFacade::new(Arc::clone(&store), Arc::new(LoopbackBus::default()));
        assert_eq!(*query.get_state(), DigitalTwinState::default());

        let record = json!({"controlMode": "quay"}).as_object().cloned().unwrap();
        store.apply_update(record);
        assert_eq!(*query.get_state(), *store.current_state());
        assert_eq!(query.get_state().control_mode.as_str(), "quay");
    }
}
