//! MQTT transport built on `rumqttc`.
//!
//! [`MqttBus::connect`] returns two halves:
//!
//! * [`MqttBus`] – the [`BusClient`] used by the command path and the health
//!   report. Publishing is non-blocking: it fails fast while the broker is
//!   unreachable instead of queueing behind a dead connection.
//! * [`MqttEventLoop`] – owns the network connection. Run it on its own task;
//!   it (re)subscribes to the state topic on every `ConnAck`, forwards state
//!   messages to [`TelemetryIngest`], and keeps the connected flag current.
//!
//! Reconnection is driven by polling the event loop again after
//! `reconnect_period`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use crane_types::CraneError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::bus::BusClient;
use crate::ingest::TelemetryIngest;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// How long shutdown waits for the DISCONNECT packet to be flushed.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Broker connection settings.
#[derive(Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    /// A random suffix is appended per process: `{prefix}-{hex}`.
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub reconnect_period: Duration,
    pub state_topic: String,
}

impl MqttSettings {
    /// `mqtt://{host}:{port}`, as reported by the health endpoint.
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }

    fn client_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.client_id_prefix, &suffix[..12])
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id(), self.host.clone(), self.port);
        // rumqttc rejects keep-alive intervals below five seconds.
        options.set_keep_alive(self.keep_alive.max(Duration::from_secs(5)));
        if let Some(username) = &self.username {
            let password = self.password.as_ref().map(|p| p.as_str()).unwrap_or_default();
            options.set_credentials(username.clone(), password.to_string());
        }
        options
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id_prefix: "crane-api".to_string(),
            keep_alive: Duration::from_secs(60),
            reconnect_period: Duration::from_millis(2000),
            state_topic: "lights/state".to_string(),
        }
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("client_id_prefix", &self.client_id_prefix)
            .field("keep_alive", &self.keep_alive)
            .field("reconnect_period", &self.reconnect_period)
            .field("state_topic", &self.state_topic)
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MqttBus
// ────────────────────────────────────────────────────────────────────────────

/// Publish handle onto the MQTT broker.
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    url: String,
}

impl MqttBus {
    /// Prepare a connection. No network I/O happens until the returned
    /// [`MqttEventLoop`] is run.
    pub fn connect(settings: &MqttSettings) -> (MqttBus, MqttEventLoop) {
        let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let url = settings.url();
        info!(url = %url, "connecting to MQTT broker");

        let bus = MqttBus {
            client: client.clone(),
            connected: Arc::clone(&connected),
            url,
        };
        let driver = MqttEventLoop {
            eventloop,
            client,
            connected,
            state_topic: settings.state_topic.clone(),
            reconnect_period: settings.reconnect_period,
        };
        (bus, driver)
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CraneError> {
        if !self.is_connected() {
            return Err(CraneError::Transport(format!(
                "not connected to MQTT broker at {}",
                self.url
            )));
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| CraneError::Transport(format!("MQTT publish to {topic} failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MqttEventLoop
// ────────────────────────────────────────────────────────────────────────────

/// Drives the broker connection and the state-topic subscription.
pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    state_topic: String,
    reconnect_period: Duration,
}

impl MqttEventLoop {
    /// Poll the connection until `shutdown` flips to `true` (or its sender is
    /// dropped), then disconnect cleanly.
    pub async fn run(mut self, ingest: TelemetryIngest, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.eventloop.poll() => match event {
                    Ok(event) => self.handle_event(event, &ingest),
                    Err(e) => {
                        if self.connected.swap(false, Ordering::SeqCst) {
                            warn!(error = %e, "MQTT connection lost");
                        } else {
                            debug!(error = %e, "MQTT connect attempt failed");
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(self.reconnect_period) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                },
            }
        }
        self.disconnect().await;
    }

    fn handle_event(&self, event: Event, ingest: &TelemetryIngest) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                self.connected.store(true, Ordering::SeqCst);
                info!("MQTT connected");
                match self.client.try_subscribe(self.state_topic.as_str(), QoS::AtMostOnce) {
                    Ok(()) => debug!(topic = %self.state_topic, "subscribe requested"),
                    Err(e) => warn!(topic = %self.state_topic, error = %e, "subscribe request failed"),
                }
            }
            Event::Incoming(Packet::SubAck(_)) => {
                info!(topic = %self.state_topic, "subscribed to state topic");
            }
            Event::Incoming(Packet::Publish(publish)) => {
                ingest.handle_message(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!("MQTT broker sent DISCONNECT");
            }
            _ => {}
        }
    }

    /// Send DISCONNECT and keep polling until it has gone out, the
    /// connection drops, or [`DISCONNECT_TIMEOUT`] elapses.
    async fn disconnect(&mut self) {
        if !self.connected.load(Ordering::SeqCst) {
            debug!("MQTT already disconnected at shutdown");
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "MQTT disconnect request failed");
            self.connected.store(false, Ordering::SeqCst);
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

        self.connected.store(false, Ordering::SeqCst);
        match flushed {
            Ok(()) => info!("MQTT disconnected"),
            Err(_) => warn!("MQTT disconnect timed out"),
        }
    }
}
