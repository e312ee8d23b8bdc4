//! # crane-middleware
//!
//! Everything that talks to the PLC over the message bus.
//!
//! * [`bus`] – the [`BusClient`] seam plus [`LoopbackBus`], an in-process
//!   broadcast bus used by tests and offline runs.
//! * [`mqtt`] – the production transport ([`MqttBus`] + [`MqttEventLoop`]).
//! * [`ingest`] – [`TelemetryIngest`], which turns state-topic messages into
//!   digital-twin updates.
//! * [`commands`] – [`CommandPublisher`], which validates operator intents and
//!   publishes them on the command topic.

pub mod bus;
pub mod commands;
pub mod ingest;
pub mod mqtt;

pub use bus::{BusClient, BusMessage, LoopbackBus, TopicSubscriber};
pub use commands::CommandPublisher;
pub use ingest::TelemetryIngest;
pub use mqtt::{MqttBus, MqttEventLoop, MqttSettings};
