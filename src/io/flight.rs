//! Keyed single-flight cache.
//!
//! Concurrent lookups for the same key share one in-flight initialisation;
//! the first caller runs it and every other caller awaits its result. If the
//! running caller is dropped (for example because its cancellation token
//! fired) the slot stays empty and the next waiter takes over, so a
//! cancelled request never leaves a poisoned or half-filled entry behind.
//! Failed initialisations are not cached either.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

pub struct FlightMap<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> FlightMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the value for `key`, running `init` if no caller has produced
    /// it yet.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key).or_default())
        };
        cell.get_or_try_init(init).await.cloned()
    }

    /// Return a completed value without starting an initialisation.
    pub async fn get(&self, key: &K) -> Option<V> {
        let cells = self.cells.lock().await;
        cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of completed entries.
    pub async fn len(&self) -> usize {
        let cells = self.cells.lock().await;
        cells.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K, V> Default for FlightMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
