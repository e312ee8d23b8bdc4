//! [`CommandPublisher`] – operator intents → command topic.
//!
//! One method per controllable axis. Each validates its input first and
//! only then publishes a [`CommandRecord`]; a validation failure never
//! touches the bus.
//!
//! Publishing is fire-and-forget. The returned [`CommandResponse`] echoes
//! what was *asked for*; the twin only changes once the PLC reports back on
//! the state topic.

use std::sync::Arc;

use crane_types::validate::{command_enum, command_level, dali_address};
use crane_types::{CommandRecord, CommandResponse, ControlMode, CraneError, OnOff, TrolleySpeed};
use tracing::{debug, warn};

use crate::bus::BusClient;

/// Publishes operator commands to the PLC.
#[derive(Clone)]
pub struct CommandPublisher {
    bus: Arc<dyn BusClient>,
    topic: String,
}

impl CommandPublisher {
    pub fn new(bus: Arc<dyn BusClient>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    // ── Boom and trolley power ──────────────────────────────────────────────

    pub async fn boom_on(&self) -> Result<CommandResponse, CraneError> {
        self.boom(OnOff::On).await
    }

    pub async fn boom_off(&self) -> Result<CommandResponse, CraneError> {
        self.boom(OnOff::Off).await
    }

    pub async fn trolley_on(&self) -> Result<CommandResponse, CraneError> {
        self.trolley(OnOff::On).await
    }

    pub async fn trolley_off(&self) -> Result<CommandResponse, CraneError> {
        self.trolley(OnOff::Off).await
    }

    async fn boom(&self, state: OnOff) -> Result<CommandResponse, CraneError> {
        self.send(CommandRecord {
            cmd: Some(state),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse::success())
    }

    async fn trolley(&self, state: OnOff) -> Result<CommandResponse, CraneError> {
        self.send(CommandRecord {
            trolley: Some(state),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse::success())
    }

    // ── Levels ──────────────────────────────────────────────────────────────

    pub async fn set_trolley_level(&self, level254: i64) -> Result<CommandResponse, CraneError> {
        let level = command_level(level254)?;
        self.send(CommandRecord {
            trolley_level254: Some(level),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            trolley_level254: Some(level),
            ..CommandResponse::success()
        })
    }

    pub async fn set_light_level(&self, level254: i64) -> Result<CommandResponse, CraneError> {
        let level = command_level(level254)?;
        self.send(CommandRecord {
            light_level254: Some(level),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            light_level254: Some(level),
            ..CommandResponse::success()
        })
    }

    // ── Trolley speed, reset and control mode ───────────────────────────────

    pub async fn set_trolley_speed(&self, speed: &str) -> Result<CommandResponse, CraneError> {
        let speed: TrolleySpeed = command_enum(speed)?;
        self.send(CommandRecord {
            trolley_speed: Some(speed),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            trolley_speed: Some(speed),
            ..CommandResponse::success()
        })
    }

    /// Ask the PLC to reset the trolley.
    ///
    /// The response always reports the post-reset values the PLC is expected
    /// to reach (slow, level 0); they are not confirmed.
    pub async fn trolley_reset(&self) -> Result<CommandResponse, CraneError> {
        self.send(CommandRecord {
            trolley_reset: Some(true),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            trolley_reset: Some(true),
            trolley_speed: Some(TrolleySpeed::Slow),
            trolley_level254: Some(0),
            ..CommandResponse::success()
        })
    }

    pub async fn set_control_mode(&self, mode: &str) -> Result<CommandResponse, CraneError> {
        let mode: ControlMode = command_enum(mode)?;
        self.send(CommandRecord {
            control_mode: Some(mode),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            control_mode: Some(mode),
            ..CommandResponse::success()
        })
    }

    // ── Per-address DALI control ────────────────────────────────────────────

    pub async fn address_on(&self, address: i64) -> Result<CommandResponse, CraneError> {
        self.address_power(address, OnOff::On).await
    }

    pub async fn address_off(&self, address: i64) -> Result<CommandResponse, CraneError> {
        self.address_power(address, OnOff::Off).await
    }

    pub async fn set_address_level(
        &self,
        address: i64,
        level254: i64,
    ) -> Result<CommandResponse, CraneError> {
        let address = dali_address(address)?;
        let level = command_level(level254)?;
        self.send(CommandRecord {
            address: Some(address),
            val: Some(level),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            address: Some(address),
            val: Some(level),
            ..CommandResponse::success()
        })
    }

    async fn address_power(&self, address: i64, state: OnOff) -> Result<CommandResponse, CraneError> {
        let address = dali_address(address)?;
        self.send(CommandRecord {
            address: Some(address),
            cmd: Some(state),
            ..CommandRecord::default()
        })
        .await?;
        Ok(CommandResponse {
            address: Some(address),
            ..CommandResponse::success()
        })
    }

    // ── Transport ───────────────────────────────────────────────────────────

    /// Serialise and publish one record. Failures are reported once and not
    /// retried.
    async fn send(&self, record: CommandRecord) -> Result<(), CraneError> {
        let payload = serde_json::to_vec(&record)
            .map_err(|e| CraneError::Transport(format!("command encoding failed: {e}")))?;

        match self.bus.publish(&self.topic, payload).await {
            Ok(()) => {
                debug!(topic = %self.topic, command = ?record, "command published");
                Ok(())
            }
            Err(e) => {
                warn!(topic = %self.topic, command = ?record, error = %e, "command publish failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LoopbackBus, TopicSubscriber};
    use serde_json::{Value, json};

    const CMD_TOPIC: &str = "lights/cmd";

    fn make_publisher() -> (Arc<LoopbackBus>, TopicSubscriber, CommandPublisher) {
        let bus = Arc::new(LoopbackBus::default());
        let sub = bus.subscribe_topic(CMD_TOPIC);
        let publisher = CommandPublisher::new(bus.clone(), CMD_TOPIC);
        (bus, sub, publisher)
    }

    fn published(sub: &mut TopicSubscriber) -> Value {
        let message = sub.try_recv().expect("a command was published");
        serde_json::from_slice(&message.payload).expect("command payload is JSON")
    }

    #[tokio::test]
    async fn boom_and_trolley_power_records() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, mut sub, publisher) = make_publisher();

        assert_eq!(publisher.boom_on().await?, CommandResponse::success());
        assert_eq!(published(&mut sub), json!({"cmd": "on"}));

        publisher.boom_off().await?;
        assert_eq!(published(&mut sub), json!({"cmd": "off"}));

        publisher.trolley_on().await?;
        assert_eq!(published(&mut sub), json!({"trolley": "on"}));

        publisher.trolley_off().await?;
        assert_eq!(published(&mut sub), json!({"trolley": "off"}));
        Ok(())
    }

    #[tokio::test]
    async fn level_commands_echo_the_level() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, mut sub, publisher) = make_publisher();

        let resp = publisher.set_trolley_level(200).await?;
        assert_eq!(resp.trolley_level254, Some(200));
        assert_eq!(published(&mut sub), json!({"trolleyLevel254": 200}));

        let resp = publisher.set_light_level(0).await?;
        assert_eq!(serde_json::to_value(&resp)?, json!({"ok": true, "lightLevel254": 0}));
        assert_eq!(published(&mut sub), json!({"lightLevel254": 0}));
        Ok(())
    }

    #[tokio::test]
    async fn out_of_range_level_never_reaches_the_bus() {
        let (bus, mut sub, publisher) = make_publisher();

        for level in [-1, 255, 1_000, i64::MIN, i64::MAX] {
            let err = publisher.set_light_level(level).await.unwrap_err();
            assert!(err.is_validation());
            let err = publisher.set_trolley_level(level).await.unwrap_err();
            assert!(err.is_validation());
        }

        assert_eq!(bus.publish_count(), 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn speed_and_mode_are_validated() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, mut sub, publisher) = make_publisher();

        let resp = publisher.set_trolley_speed("medium").await?;
        assert_eq!(resp.trolley_speed, Some(TrolleySpeed::Medium));
        assert_eq!(published(&mut sub), json!({"trolleySpeed": "medium"}));

        let resp = publisher.set_control_mode("quay").await?;
        assert_eq!(resp.control_mode, Some(ControlMode::Quay));
        assert_eq!(published(&mut sub), json!({"controlMode": "quay"}));

        assert!(publisher.set_trolley_speed("Fast").await.unwrap_err().is_validation());
        assert!(publisher.set_control_mode("auto").await.unwrap_err().is_validation());
        assert_eq!(bus.publish_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn trolley_reset_echoes_intended_values() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, mut sub, publisher) = make_publisher();

        let resp = publisher.trolley_reset().await?;
        assert_eq!(
            serde_json::to_value(&resp)?,
            json!({"ok": true, "trolleyReset": true, "trolleySpeed": "slow", "trolleyLevel254": 0})
        );
        assert_eq!(published(&mut sub), json!({"trolleyReset": true}));
        Ok(())
    }

    #[tokio::test]
    async fn address_commands() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, mut sub, publisher) = make_publisher();

        publisher.address_on(0).await?;
        assert_eq!(published(&mut sub), json!({"address": 0, "cmd": "on"}));

        publisher.address_off(63).await?;
        assert_eq!(published(&mut sub), json!({"address": 63, "cmd": "off"}));

        let resp = publisher.set_address_level(12, 180).await?;
        assert_eq!(serde_json::to_value(&resp)?, json!({"ok": true, "address": 12, "val": 180}));
        assert_eq!(published(&mut sub), json!({"address": 12, "val": 180}));
        Ok(())
    }

    #[tokio::test]
    async fn address_out_of_range_fails_before_publish() {
        let (bus, _sub, publisher) = make_publisher();

        let err = publisher.set_address_level(70, 10).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("address"));
        assert!(publisher.set_address_level(5, 300).await.unwrap_err().is_validation());
        assert!(publisher.address_on(64).await.unwrap_err().is_validation());
        assert!(publisher.address_off(-1).await.unwrap_err().is_validation());

        assert_eq!(bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_distinct_from_validation() {
        let (bus, _sub, publisher) = make_publisher();
        bus.set_connected(false);

        let err = publisher.set_light_level(10).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!err.is_validation());

        let err = publisher.set_light_level(999).await.unwrap_err();
        assert!(err.is_validation(), "validation runs before the transport is touched");
    }
}
