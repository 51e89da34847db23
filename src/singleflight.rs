// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 tvlink contributors

//! Keyed deduplication of in-flight async operations.
//!
//! When several callers request the same key concurrently, the first becomes
//! the leader and runs the operation; the rest wait for its settlement and
//! receive the same value or the same error. The key is unregistered the
//! moment the leader settles, so a failed key can be retried immediately by
//! the next caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::broadcast;

/// Error delivered by [`SingleFlight::run`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlightError<E> {
    /// The leader was dropped before its operation settled.
    #[error("in-flight operation was dropped before settling")]
    LeaderDropped,
    /// The operation itself failed; every waiter receives the same error.
    #[error("{0}")]
    Inner(E),
}

type FlightMap<K, V, E> = Mutex<HashMap<K, broadcast::Sender<Result<V, E>>>>;

/// At most one in-flight operation per key; all concurrent requesters share
/// its result.
pub struct SingleFlight<K, V, E> {
    flights: FlightMap<K, V, E>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fut` under `key`, or join the flight already running for it.
    ///
    /// The leader drives `fut` on the calling task; followers suspend until
    /// it settles. The key is removed from the registry before the result
    /// is published, so a caller arriving after a failure starts a fresh
    /// flight rather than observing the stale one.
    pub async fn run<Fut>(&self, key: K, fut: Fut) -> Result<V, FlightError<E>>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        let mut rx = {
            let mut flights = self.flights.lock();
            match flights.entry(key.clone()) {
                Entry::Occupied(slot) => Some(slot.get().subscribe()),
                Entry::Vacant(slot) => {
                    let (tx, _) = broadcast::channel(1);
                    slot.insert(tx);
                    None
                }
            }
        };

        if let Some(rx) = rx.as_mut() {
            return match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(FlightError::Inner(e)),
                Err(_) => Err(FlightError::LeaderDropped),
            };
        }

        // Leader path. The guard unregisters the key even if this future is
        // dropped mid-flight, in which case followers see a closed channel.
        let guard = FlightGuard {
            key: Some(key),
            flights: &self.flights,
        };

        let result = fut.await;

        if let Some(tx) = guard.settle() {
            // No receivers is fine: nobody else asked for this key.
            let _ = tx.send(result.clone());
        }

        result.map_err(FlightError::Inner)
    }

    /// Number of flights currently in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the flight key on settlement or drop, whichever comes first.
struct FlightGuard<'a, K: Eq + Hash, V, E> {
    key: Option<K>,
    flights: &'a FlightMap<K, V, E>,
}

impl<K: Eq + Hash, V, E> FlightGuard<'_, K, V, E> {
    fn settle(mut self) -> Option<broadcast::Sender<Result<V, E>>> {
        let key = self.key.take()?;
        self.flights.lock().remove(&key)
    }
}

impl<K: Eq + Hash, V, E> Drop for FlightGuard<'_, K, V, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights.lock().remove(&key);
        }
    }
}
