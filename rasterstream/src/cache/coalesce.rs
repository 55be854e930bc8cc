//! Per-tile request coalescing.
//!
//! The first request for a tile that misses the cache becomes the leader and
//! holds the tile's slot until it publishes an outcome. Requests arriving in
//! the meantime subscribe to the slot instead of fetching. Dropping the
//! leader's guard without completing (cancellation, panic) closes the
//! channel, which releases the waiters to try again.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::CacheError;
use crate::index::{BandId, TileId};

/// Result of one in-flight fetch, as seen by waiters.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightOutcome {
    /// Band the leader fetched.
    pub band: BandId,
    pub result: Result<(), CacheError>,
}

/// Outcome of registering interest in a tile.
pub enum CoalesceResult {
    /// No fetch is in flight; the caller must fetch and then complete the
    /// guard.
    Leader(FlightGuard),
    /// Another request is fetching this tile; wait on the receiver.
    Coalesced(broadcast::Receiver<FlightOutcome>),
}

/// Tracks in-flight tile fetches.
#[derive(Debug, Default)]
pub struct RequestCoalescer {
    in_flight: DashMap<TileId, broadcast::Sender<FlightOutcome>>,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the tile's slot or subscribes to the current holder.
    pub fn register(self: &Arc<Self>, tile: &TileId) -> CoalesceResult {
        match self.in_flight.entry(tile.clone()) {
            Entry::Occupied(slot) => CoalesceResult::Coalesced(slot.get().subscribe()),
            Entry::Vacant(slot) => {
                let (tx, _) = broadcast::channel(1);
                slot.insert(tx);
                CoalesceResult::Leader(FlightGuard {
                    coalescer: Arc::clone(self),
                    tile: tile.clone(),
                    completed: false,
                })
            }
        }
    }

    pub fn is_in_flight(&self, tile: &TileId) -> bool {
        self.in_flight.contains_key(tile)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Leadership of one tile's slot.
pub struct FlightGuard {
    coalescer: Arc<RequestCoalescer>,
    tile: TileId,
    completed: bool,
}

impl FlightGuard {
    /// Frees the slot and publishes `outcome` to every waiter.
    pub fn complete(mut self, outcome: FlightOutcome) {
        self.completed = true;
        if let Some((_, tx)) = self.coalescer.in_flight.remove(&self.tile) {
            // No receivers is fine
            let _ = tx.send(outcome);
        }
    }

    pub fn tile(&self) -> &TileId {
        &self.tile
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.coalescer.in_flight.remove(&self.tile);
        }
    }
}
