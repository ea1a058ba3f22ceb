use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pool::DrainBehavior;
use crate::runtime::tls::{Slot, SlotObject, TlsRegistry, Worker};

use super::cluster::Cluster;
use super::host::Host;
use super::init::ClusterManagerInitHelper;
use super::thread_local::{ClusterEntry, ThreadLocalClusterManager};

/// observer of cluster add/update/remove events; invoked on every worker
/// after that worker's entry has been swapped
pub trait ClusterUpdateCallbacks: Send + Sync {
    fn on_cluster_add_or_update(&self, name: &str, entry: &Arc<ClusterEntry>);
    fn on_cluster_removal(&self, name: &str);
}

type CallbackTable = Arc<Mutex<HashMap<u64, Arc<dyn ClusterUpdateCallbacks>>>>;

/// deregisters the callbacks when dropped
pub struct ClusterUpdateCallbacksHandle {
    id: u64,
    table: CallbackTable,
}

impl Drop for ClusterUpdateCallbacksHandle {
    fn drop(&mut self) {
        self.table.lock().remove(&self.id);
    }
}

/// owner of every cluster: the main-thread maps plus the per-worker views
/// published through a tls slot.
///
/// membership changes posted for one cluster reach each worker in posting
/// order, so a later update can never be overtaken by an earlier one.
pub struct ClusterManager {
    registry: Arc<TlsRegistry>,
    slot: Slot,
    active: Mutex<HashMap<String, Arc<Cluster>>>,
    warming: Mutex<HashMap<String, Arc<Cluster>>>,
    init_helper: Arc<ClusterManagerInitHelper>,
    update_callbacks: CallbackTable,
    next_callback_id: AtomicU64,
    lb_seed: Option<u64>,
}

impl ClusterManager {
    pub fn new(registry: Arc<TlsRegistry>, lb_seed: Option<u64>) -> Arc<ClusterManager> {
        let slot = TlsRegistry::allocate_slot(&registry);
        slot.set(|_| Arc::new(ThreadLocalClusterManager::new()) as SlotObject);
        Arc::new(ClusterManager {
            registry,
            slot,
            active: Mutex::new(HashMap::new()),
            warming: Mutex::new(HashMap::new()),
            init_helper: ClusterManagerInitHelper::new(),
            update_callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_callback_id: AtomicU64::new(0),
            lb_seed,
        })
    }

    pub fn init_helper(&self) -> &Arc<ClusterManagerInitHelper> {
        &self.init_helper
    }

    fn tlcm(worker: &Worker, slot: &Slot) -> Option<Arc<ThreadLocalClusterManager>> {
        slot.get_typed::<ThreadLocalClusterManager>(worker)
    }

    /// install or replace a cluster and fan the view out to the workers.
    /// returns false when an identical active entry is already installed.
    pub fn add_or_update_cluster(&self, cluster: Arc<Cluster>) -> bool {
        let name = cluster.info().name().to_string();
        let replaced = {
            let mut active = self.active.lock();
            let existing = active.insert(name.clone(), cluster.clone());
            match existing {
                Some(old) if Arc::ptr_eq(&old, &cluster) => return false,
                Some(_) => {
                    tracing::info!("cluster {} modified", name);
                    true
                }
                None => {
                    tracing::info!("cluster {} added", name);
                    false
                }
            }
        };
        if !replaced {
            self.init_helper.add_cluster(cluster.clone());
            // membership deltas after this point flow to the workers as
            // they happen, in posting order
            let slot = self.slot.clone();
            let cluster_name = name.clone();
            cluster
                .priority_set()
                .add_member_update_cb(move |priority, added, removed| {
                    let added = added.to_vec();
                    let removed = removed.to_vec();
                    let cluster_name = cluster_name.clone();
                    slot.run_on_all_threads(
                        move |_, obj| {
                            let Some(tlcm) =
                                obj.and_then(|o| o.downcast::<ThreadLocalClusterManager>().ok())
                            else {
                                return;
                            };
                            if let Some(entry) = tlcm.get(&cluster_name) {
                                entry.update_hosts(priority, added.clone(), removed.clone());
                            }
                        },
                        || {},
                    );
                });
        }
        self.warming.lock().remove(&name);
        self.post_cluster_to_workers(cluster);
        true
    }

    fn post_cluster_to_workers(&self, cluster: Arc<Cluster>) {
        let name = cluster.info().name().to_string();
        let info = cluster.info().clone();
        let main_set = cluster.priority_set().clone();
        let callbacks = self.update_callbacks.clone();
        let lb_seed = self.lb_seed;
        self.slot.run_on_all_threads(
            move |worker, obj| {
                let Some(tlcm) = obj.and_then(|o| o.downcast::<ThreadLocalClusterManager>().ok())
                else {
                    tracing::warn!("worker {} has no cluster table yet", worker.id);
                    return;
                };
                let membership = main_set.priority_set().clone_membership();
                let entry = Arc::new(ClusterEntry::new(info.clone(), membership, lb_seed));
                tlcm.insert(name.clone(), entry.clone());
                for cb in callbacks.lock().values() {
                    cb.on_cluster_add_or_update(&name, &entry);
                }
            },
            || {},
        );
    }

    /// drop a cluster everywhere, draining its pools hard
    pub fn remove_cluster(&self, name: &str) -> bool {
        let had = self.active.lock().remove(name).is_some() | self.warming.lock().remove(name).is_some();
        if !had {
            return false;
        }
        tracing::info!("cluster {} removed", name);
        let name = name.to_string();
        let callbacks = self.update_callbacks.clone();
        self.slot.run_on_all_threads(
            move |_, obj| {
                let Some(tlcm) = obj.and_then(|o| o.downcast::<ThreadLocalClusterManager>().ok())
                else {
                    return;
                };
                if tlcm.remove(&name) {
                    for cb in callbacks.lock().values() {
                        cb.on_cluster_removal(&name);
                    }
                }
            },
            || {},
        );
        true
    }

    /// the caller's per-worker view of a cluster
    pub fn get_thread_local_cluster(
        &self,
        worker: &Worker,
        name: &str,
    ) -> Option<Arc<ClusterEntry>> {
        Self::tlcm(worker, &self.slot).and_then(|tlcm| tlcm.get(name))
    }

    pub fn active_cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.active.lock().get(name).cloned()
    }

    pub fn active_cluster_names(&self) -> Vec<String> {
        self.active.lock().keys().cloned().collect()
    }

    /// soft-drain pools, one cluster or all, hosts filtered by predicate
    pub fn drain_connections<F>(&self, cluster_name: Option<&str>, predicate: F)
    where
        F: Fn(&Host) -> bool + Send + Sync + 'static,
    {
        let target = cluster_name.map(str::to_string);
        let predicate = Arc::new(predicate);
        self.slot.run_on_all_threads(
            move |_, obj| {
                let Some(tlcm) = obj.and_then(|o| o.downcast::<ThreadLocalClusterManager>().ok())
                else {
                    return;
                };
                let names = match &target {
                    Some(name) => vec![name.clone()],
                    None => tlcm.cluster_names(),
                };
                for name in names {
                    if let Some(entry) = tlcm.get(&name) {
                        let predicate = predicate.clone();
                        entry.drain_connections(DrainBehavior::DrainExisting, move |h| {
                            predicate(h)
                        });
                    }
                }
            },
            || {},
        );
    }

    /// register for add/update/remove notifications
    pub fn add_thread_local_cluster_update_callbacks(
        &self,
        cb: Arc<dyn ClusterUpdateCallbacks>,
    ) -> ClusterUpdateCallbacksHandle {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.update_callbacks.lock().insert(id, cb);
        ClusterUpdateCallbacksHandle {
            id,
            table: self.update_callbacks.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<TlsRegistry> {
        &self.registry
    }
}
