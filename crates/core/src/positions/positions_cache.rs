use dashmap::DashMap;
use std::sync::Arc;

use crate::broker::DateWindow;
use crate::errors::Result;
use crate::positions::positions_model::Positions;

/// Cache key: portfolio set (order-insensitive), instrument id, date window.
///
/// For a currency pair the instrument id is the pair group (`USDRUB`), not a
/// single settlement-tenor contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionsKey {
    portfolios: Vec<String>,
    instrument: String,
    window: DateWindow,
}

impl PositionsKey {
    pub fn new(mut portfolios: Vec<String>, instrument: String, window: DateWindow) -> Self {
        portfolios.sort();
        portfolios.dedup();
        Self {
            portfolios,
            instrument,
            window,
        }
    }
}

/// Concurrency-safe cache of matched positions.
///
/// Matching is a pure function of its inputs, so snapshots are shared as
/// `Arc` and computed at most once per key via the map's own entry locking.
/// Any write to the underlying transactions or events must invalidate.
#[derive(Debug, Default)]
pub struct PositionsCache {
    positions: DashMap<PositionsKey, Arc<Positions>>,
}

impl PositionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot for `key`, computing and storing it on a
    /// cold key. Concurrent lookups of distinct keys never contend.
    pub fn get_or_compute<F>(&self, key: PositionsKey, compute: F) -> Result<Arc<Positions>>
    where
        F: FnOnce() -> Result<Positions>,
    {
        let entry = self
            .positions
            .entry(key)
            .or_try_insert_with(|| compute().map(Arc::new))?;
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, key: &PositionsKey) -> Option<Arc<Positions>> {
        self.positions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn invalidate(&self, key: &PositionsKey) {
        self.positions.remove(key);
    }

    /// Coarse invalidation on any source-data write.
    pub fn invalidate_all(&self) {
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
