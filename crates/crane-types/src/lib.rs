//! `crane-types` – shared vocabulary of the crane supervisor.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! digital-twin snapshot, the bus command record, the realtime gateway frame
//! and the single [`CraneError`] taxonomy.
//!
//! Field names on the wire follow the PLC's camelCase vocabulary
//! (`trolleyLevel254`, `controlMode`, …).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod validate;

/// A decoded telemetry message, kept verbatim including unknown fields.
pub type TelemetryRecord = Map<String, Value>;

// ────────────────────────────────────────────────────────────────────────────
// Enumerated fields
// ────────────────────────────────────────────────────────────────────────────

/// Power state reported for the boom and trolley circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
    /// Nothing reported since process start.
    #[default]
    Unknown,
}

/// Trolley travel speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrolleySpeed {
    #[default]
    Slow,
    Medium,
    Fast,
}

/// Who drives the lighting: the quay automation or the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Quay,
    #[default]
    Manual,
}

/// The on/off vocabulary of the command topic (`cmd`, `trolley`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnOff {
    On,
    Off,
}

macro_rules! wire_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// The exact wire spelling of this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        /// Case-sensitive: only the exact wire spelling is accepted.
        impl FromStr for $ty {
            type Err = CraneError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(CraneError::Validation(format!(
                        "{} must be one of [{}], got {other:?}",
                        $field,
                        [$($text),+].join(", "),
                    ))),
                }
            }
        }
    };
}

wire_enum!(SwitchState, "switch state", { On => "on", Off => "off", Unknown => "unknown" });
wire_enum!(TrolleySpeed, "speed", { Slow => "slow", Medium => "medium", Fast => "fast" });
wire_enum!(ControlMode, "mode", { Quay => "quay", Manual => "manual" });
wire_enum!(OnOff, "cmd", { On => "on", Off => "off" });

// ────────────────────────────────────────────────────────────────────────────
// Digital twin
// ────────────────────────────────────────────────────────────────────────────

/// Last-known state of the crane lighting and trolley equipment.
///
/// Snapshots are immutable once published by the store; a new value is
/// produced for every accepted telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalTwinState {
    pub boom: SwitchState,
    pub trolley: SwitchState,
    /// Always within `0..=254`.
    pub trolley_level254: u8,
    /// Always within `0..=254`.
    pub light_level254: u8,
    pub trolley_speed: TrolleySpeed,
    pub control_mode: ControlMode,
    /// Health of the DALI lighting sub-bus.
    pub dali_ok: bool,
    /// The last telemetry message exactly as decoded.
    pub raw: Option<TelemetryRecord>,
    /// Milliseconds since the Unix epoch of the last applied message.
    pub ts: Option<i64>,
}

impl Default for DigitalTwinState {
    fn default() -> Self {
        Self {
            boom: SwitchState::Unknown,
            trolley: SwitchState::Unknown,
            trolley_level254: 0,
            light_level254: 0,
            trolley_speed: TrolleySpeed::Slow,
            control_mode: ControlMode::Manual,
            dali_ok: true,
            raw: None,
            ts: None,
        }
    }
}

/// Frame pushed to realtime clients.
///
/// Serialises as `{"type":"state","payload":{…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum GatewayMessage {
    State(DigitalTwinState),
}

// ────────────────────────────────────────────────────────────────────────────
// Command path
// ────────────────────────────────────────────────────────────────────────────

/// Flat command record published on the command topic.
///
/// Only the populated fields are serialised; the PLC acts on whichever keys
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Boom power, or per-fixture power when `address` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<OnOff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley: Option<OnOff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_level254: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_level254: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_speed: Option<TrolleySpeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<ControlMode>,
    /// DALI short address, `0..=63`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,
    /// Per-address level, `0..=254`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_reset: Option<bool>,
}

/// Result of a command call: `{ok: true, …echoed fields}`.
///
/// The echoed fields describe the *intended* effect; they are never read
/// back from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_level254: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light_level254: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_speed: Option<TrolleySpeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_mode: Option<ControlMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trolley_reset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val: Option<u8>,
}

impl CommandResponse {
    /// A bare `{ok: true}`.
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// `{ok: false, error}` for the boundary layer.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Liveness report for pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub ok: bool,
    /// Live transport flag at the time of the call.
    pub bus_connected: bool,
    pub bus_url: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by the command path, the telemetry path and the
/// process bootstrap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CraneError {
    /// Operator input outside its domain. Raised before any bus I/O.
    #[error("Validation Error: {0}")]
    Validation(String),

    /// Bus publish/connect failure.
    #[error("Transport Error: {0}")]
    Transport(String),

    /// Malformed telemetry payload.
    #[error("Decode Error: {0}")]
    Decode(String),

    /// A realtime channel could not take a frame right now.
    #[error("Channel Error: {0}")]
    Channel(String),

    /// The realtime channel has gone away.
    #[error("Channel Closed")]
    ChannelClosed,

    #[error("Config Error: {0}")]
    Config(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

impl CraneError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CraneError::Validation(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CraneError::Transport(_))
    }
}
