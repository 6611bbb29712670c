//! Invalidation broadcast.
//!
//! A branch switch makes every piece of location-scoped derived state stale
//! at once. Rather than tearing the whole client down, the switch broadcasts
//! an `Invalidation` event: subscribers drop derived state and refetch, while
//! unrelated in-memory state (open forms) survives.

use medidesk_core::LocationId;
use tokio::sync::broadcast;

/// Events telling subscribers that derived state must re-derive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// The active branch changed; everything scoped to a location is stale.
    LocationChanged { location: LocationId },
    /// The session was torn down (logout); all snapshots are gone.
    SessionCleared,
}

/// Broadcast channel for [`Invalidation`] events.
///
/// Cloning shares the underlying channel. Publishing with no subscribers is
/// not an error; slow subscribers that lag simply miss events and should
/// treat a lag as "re-derive everything".
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    tx: broadcast::Sender<Invalidation>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Invalidation) {
        let delivered = self.tx.send(event.clone()).unwrap_or(0);
        tracing::debug!(?event, delivered, "published invalidation");
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
