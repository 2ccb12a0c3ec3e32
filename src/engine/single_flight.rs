//! Single-flight deduplication of concurrent identical work.
//!
//! The first caller for a key (the leader) installs a shared future; callers
//! arriving while it runs await the same future instead of starting their own.
//! The leader owns a [`FlightGuard`] that removes the entry when dropped, so a
//! leader that is cancelled mid-flight cannot leave a finished handle behind
//! for later callers.

use crate::types::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Handle every participant of one flight awaits.
pub type Flight<T> = Shared<BoxFuture<'static, Result<T>>>;

/// In-flight map keyed by cache key.
pub struct SingleFlight<T: Clone> {
    in_flight: Mutex<HashMap<String, Flight<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Join the flight for `key`, starting it with `start` if none is running.
    ///
    /// Returns the shared handle and, for the leader only, the guard that
    /// retires the flight.
    pub fn join<F>(&self, key: &str, start: F) -> (Flight<T>, Option<FlightGuard<'_, T>>)
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return (existing.clone(), None);
        }

        let flight = start().shared();
        in_flight.insert(key.to_string(), flight.clone());
        let guard = FlightGuard {
            owner: self,
            key: key.to_string(),
            flight: flight.clone(),
        };
        (flight, Some(guard))
    }

    /// Number of flights currently running.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

/// Retires a flight when the leader is done with it (or dropped).
pub struct FlightGuard<'a, T: Clone> {
    owner: &'a SingleFlight<T>,
    key: String,
    flight: Flight<T>,
}

impl<T: Clone> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let mut in_flight = self.owner.in_flight.lock();
        let ours = in_flight
            .get(&self.key)
            .is_some_and(|current| current.ptr_eq(&self.flight));
        if ours {
            in_flight.remove(&self.key);
        }
    }
}

impl<T: Clone> fmt::Debug for FlightGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightGuard").field("key", &self.key).finish()
    }
}
