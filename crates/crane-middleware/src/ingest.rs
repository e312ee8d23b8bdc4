//! [`TelemetryIngest`] – state topic → digital twin.
//!
//! Every message on the state topic is decoded as a JSON object and handed
//! to [`DigitalTwinStore::apply_update`]. Anything that does not decode
//! is logged and dropped; nothing on this path is allowed to surface as an
//! error to the transport or to realtime clients.
//!
//! Messages are applied in the order they are received. The bus gives no
//! ordering guarantee, so "last received wins".

use std::sync::Arc;

use crane_twin::DigitalTwinStore;
use crane_types::{CraneError, DigitalTwinState, TelemetryRecord};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::TopicSubscriber;

/// Feeds decoded state messages into the store.
#[derive(Clone)]
pub struct TelemetryIngest {
    store: Arc<DigitalTwinStore>,
    state_topic: Arc<str>,
}

impl TelemetryIngest {
    pub fn new(store: Arc<DigitalTwinStore>, state_topic: impl Into<String>) -> Self {
        Self {
            store,
            state_topic: Arc::from(state_topic.into()),
        }
    }

    /// Decode a state payload. Unknown fields are kept.
    pub fn decode(payload: &[u8]) -> Result<TelemetryRecord, CraneError> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(record)) => Ok(record),
            Ok(other) => Err(CraneError::Decode(format!(
                "state message must be a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(CraneError::Decode(e.to_string())),
        }
    }

    /// Handle one bus message.
    ///
    /// Returns the new snapshot when the message was applied, `None` when it
    /// was for another topic or failed to decode.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<Arc<DigitalTwinState>> {
        if topic != &*self.state_topic {
            return None;
        }
        match Self::decode(payload) {
            Ok(record) => {
                let snapshot = self.store.apply_update(record);
                debug!(topic, ts = ?snapshot.ts, "telemetry applied");
                Some(snapshot)
            }
            Err(e) => {
                warn!(topic, bytes = payload.len(), error = %e, "dropping undecodable telemetry");
                None
            }
        }
    }

    /// Drain a loopback [`TopicSubscriber`] until the bus goes away.
    pub async fn run(self, mut subscriber: TopicSubscriber) {
        while let Some(message) = subscriber.recv().await {
            self.handle_message(&message.topic, &message.payload);
        }
        debug!(topic = %self.state_topic, "telemetry subscriber closed");
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackBus;
    use serde_json::json;

    const STATE_TOPIC: &str = "lights/state";

    fn make_ingest() -> (Arc<DigitalTwinStore>, TelemetryIngest) {
        let store = Arc::new(DigitalTwinStore::new());
        let ingest = TelemetryIngest::new(Arc::clone(&store), STATE_TOPIC);
        (store, ingest)
    }

    #[test]
    fn decode_keeps_unknown_fields() -> Result<(), Box<dyn std::error::Error>> {
        let record = TelemetryIngest::decode(br#"{"boom":"on","plcCycleMs":12}"#)?;
        assert_eq!(record.get("plcCycleMs"), Some(&json!(12)));
        Ok(())
    }

    #[test]
    fn decode_rejects_non_objects_and_garbage() {
        let payloads: [&[u8]; 6] = [b"not json", b"", b"[1,2,3]", b"42", b"\"on\"", b"{\"boom\":"];
        for payload in payloads {
            let err = TelemetryIngest::decode(payload).unwrap_err();
            assert!(matches!(err, CraneError::Decode(_)), "{payload:?} should fail to decode");
        }
    }

    #[test]
    fn valid_message_updates_store() {
        let (store, ingest) = make_ingest();
        let payload = serde_json::to_vec(&json!({"trolleyLevel254": 120, "daliOk": false})).unwrap();

        let snapshot = ingest.handle_message(STATE_TOPIC, &payload).expect("applied");

        assert_eq!(snapshot.trolley_level254, 120);
        assert!(!snapshot.dali_ok);
        assert_eq!(*store.current_state(), *snapshot);
    }

    #[test]
    fn malformed_message_leaves_store_untouched() {
        let (store, ingest) = make_ingest();
        ingest.handle_message(STATE_TOPIC, br#"{"daliOk": false}"#);
        let before = store.current_state();

        assert!(ingest.handle_message(STATE_TOPIC, b"{daliOk: true").is_none());

        let after = store.current_state();
        assert_eq!(*after, *before, "ts, raw and daliOk must be unchanged");
    }

    #[test]
    fn other_topics_are_ignored() {
        let (store, ingest) = make_ingest();
        assert!(ingest.handle_message("lights/cmd", br#"{"boom":"on"}"#).is_none());
        assert_eq!(*store.current_state(), DigitalTwinState::default());
    }

    #[test]
    fn out_of_order_delivery_keeps_last_received() {
        let (store, ingest) = make_ingest();
        ingest.handle_message(STATE_TOPIC, br#"{"lightLevel254": 200, "seq": 2}"#);
        ingest.handle_message(STATE_TOPIC, br#"{"lightLevel254": 100, "seq": 1}"#);

        let state = store.current_state();
        assert_eq!(state.light_level254, 100);
        assert_eq!(state.raw.as_ref().and_then(|r| r.get("seq")), Some(&json!(1)));
    }

    #[tokio::test]
    async fn run_drains_loopback_subscriber() {
        let (store, ingest) = make_ingest();
        let bus = Arc::new(LoopbackBus::default());
        let subscriber = bus.subscribe_topic(STATE_TOPIC);

        bus.inject(STATE_TOPIC, br#"{"boom":"on"}"#.to_vec());
        bus.inject(STATE_TOPIC, b"garbage".to_vec());
        bus.inject(STATE_TOPIC, br#"{"trolley":"off"}"#.to_vec());
        drop(bus);

        ingest.run(subscriber).await;

        let state = store.current_state();
        assert_eq!(state.boom.as_str(), "on");
        assert_eq!(state.trolley.as_str(), "off");
    }
}
