//! `crane-twin` – The Digital Twin
//!
//! Holds the one in-memory mirror of the crane's equipment state and fans
//! its changes out to realtime clients.
//!
//! # Modules
//!
//! - [`store`] – [`DigitalTwinStore`]: applies telemetry deltas field by
//!   field and notifies registered [`StateObserver`]s after each commit.
//! - [`fanout`] – [`RealtimeFanout`]: one bounded channel per realtime
//!   client, seeded with the current snapshot on connect.

pub mod fanout;
pub mod store;

pub use fanout::{DEFAULT_CHANNEL_CAPACITY, RealtimeChannel, RealtimeFanout};
pub use store::{DigitalTwinStore, ObserverId, StateObserver};
