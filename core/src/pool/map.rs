use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{DrainBehavior, DrainablePool};

/// `(priority, key) -> pool` multiplexer.
///
/// the factory runs at most once per key under the map lock. during drain
/// iteration the `do_not_delete` guard keeps teardown paths from removing
/// entries out from under the iterator; the caller sweeps empty pools
/// afterwards with `remove_idle`.
pub struct PriorityConnPoolMap<K, P>
where
    K: Eq + Hash + Clone,
    P: DrainablePool,
{
    pools: Mutex<HashMap<(u32, K), Arc<P>>>,
    do_not_delete: AtomicBool,
}

impl<K, P> PriorityConnPoolMap<K, P>
where
    K: Eq + Hash + Clone,
    P: DrainablePool,
{
    pub fn new() -> Self {
        PriorityConnPoolMap {
            pools: Mutex::new(HashMap::new()),
            do_not_delete: AtomicBool::new(false),
        }
    }

    /// fetch the pool for `(priority, key)`, creating it on first use
    pub fn get_or_create<F>(&self, priority: u32, key: K, factory: F) -> Arc<P>
    where
        F: FnOnce() -> Arc<P>,
    {
        let mut pools = self.pools.lock();
        pools
            .entry((priority, key))
            .or_insert_with(factory)
            .clone()
    }

    pub fn get(&self, priority: u32, key: &K) -> Option<Arc<P>> {
        self.pools.lock().get(&(priority, key.clone())).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn do_not_delete(&self) -> bool {
        self.do_not_delete.load(Ordering::SeqCst)
    }

    /// drain every pool; the guard is held across the iteration
    pub fn drain_connections(&self, behavior: DrainBehavior) {
        self.do_not_delete.store(true, Ordering::SeqCst);
        let pools: Vec<Arc<P>> = self.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.drain_connections(behavior);
        }
        self.do_not_delete.store(false, Ordering::SeqCst);
    }

    /// sweep pools with nothing in flight; no-op while the guard is held
    pub fn remove_idle(&self) {
        if self.do_not_delete() {
            return;
        }
        self.pools.lock().retain(|_, pool| !pool.is_idle());
    }

    pub fn clear(&self) {
        self.pools.lock().clear();
    }

    pub fn all_pools(&self) -> Vec<Arc<P>> {
        self.pools.lock().values().cloned().collect()
    }
}

impl<K, P> Default for PriorityConnPoolMap<K, P>
where
    K: Eq + Hash + Clone,
    P: DrainablePool,
{
    fn default() -> Self {
        PriorityConnPoolMap::new()
    }
}
