//! [`RealtimeFanout`] – pushes every twin update to connected realtime
//! clients.
//!
//! Each client gets its own bounded Tokio `mpsc` channel registered as a
//! store observer. Sends use `try_send`, so a client that stops reading
//! only loses its own frames once its buffer is full; nobody else waits on
//! it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crane_types::{CraneError, DigitalTwinState, GatewayMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::store::{DigitalTwinStore, ObserverId, StateObserver};

/// Default number of frames buffered per client.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

// ────────────────────────────────────────────────────────────────────────────
// Per-client channel
// ────────────────────────────────────────────────────────────────────────────

/// Store observer feeding one client's queue.
struct ChannelSink {
    sender: mpsc::Sender<Arc<GatewayMessage>>,
}

impl StateObserver for ChannelSink {
    fn on_state_change(&self, snapshot: &Arc<DigitalTwinState>) -> Result<(), CraneError> {
        let frame = Arc::new(GatewayMessage::State(DigitalTwinState::clone(snapshot)));
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CraneError::Channel(
                "realtime client buffer full; frame dropped".to_string(),
            )),
            Err(TrySendError::Closed(_)) => Err(CraneError::ChannelClosed),
        }
    }
}

/// Receiving half handed to the connection task of one realtime client.
pub struct RealtimeChannel {
    id: ObserverId,
    receiver: mpsc::Receiver<Arc<GatewayMessage>>,
}

impl RealtimeChannel {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next frame. Returns `None` once the fanout has closed
    /// this channel.
    pub async fn recv(&mut self) -> Option<Arc<GatewayMessage>> {
        self.receiver.recv().await
    }

    #[cfg(test)]
    fn try_recv(&mut self) -> Option<Arc<GatewayMessage>> {
        self.receiver.try_recv().ok()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RealtimeFanout
// ────────────────────────────────────────────────────────────────────────────

/// Registry of realtime client channels backed by one [`DigitalTwinStore`].
pub struct RealtimeFanout {
    store: Arc<DigitalTwinStore>,
    capacity: usize,
    channels: Mutex<HashSet<ObserverId>>,
}

impl RealtimeFanout {
    /// `capacity` is the per-client frame buffer (at least 1).
    pub fn new(store: Arc<DigitalTwinStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            channels: Mutex::new(HashSet::new()),
        }
    }

    /// Open a channel for a new client.
    ///
    /// The first frame already waiting on the returned channel carries the
    /// current snapshot; every later frame corresponds to one store update.
    pub fn connect(&self) -> Result<RealtimeChannel, CraneError> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut channels = self.lock_channels();
        self.prune(&mut channels);
        let id = self
            .store
            .subscribe_with_snapshot(Arc::new(ChannelSink { sender }))?;
        channels.insert(id);
        info!(channel = id, clients = channels.len(), "realtime client connected");

        Ok(RealtimeChannel { id, receiver })
    }

    /// Drop a client's channel. Unknown ids are ignored.
    pub fn disconnect(&self, id: ObserverId) {
        let mut channels = self.lock_channels();
        if channels.remove(&id) {
            self.store.unsubscribe(id);
            info!(channel = id, clients = channels.len(), "realtime client disconnected");
        }
    }

    /// Close every open channel. Receivers drain what is buffered and then
    /// see `None`.
    pub fn close_all(&self) {
        let mut channels = self.lock_channels();
        for id in channels.drain() {
            self.store.unsubscribe(id);
        }
        debug!("all realtime channels closed");
    }

    /// Clients still registered with the store. Channels whose receiver was
    /// dropped stop counting once the store has deregistered them.
    pub fn connected_count(&self) -> usize {
        let mut channels = self.lock_channels();
        self.prune(&mut channels);
        channels.len()
    }

    /// Forget ids the store already deregistered. Caller holds the channels
    /// lock; the registry lock is taken second.
    fn prune(&self, channels: &mut HashSet<ObserverId>) {
        channels.retain(|id| {
            let live = self.store.is_subscribed(*id);
            if !live {
                debug!(channel = id, "realtime client gone; forgetting channel");
            }
            live
        });
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashSet<ObserverId>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
