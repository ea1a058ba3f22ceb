use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::cluster::{Cluster, InitializePhase};

/// progress of cluster-manager initialization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitPhase {
    Loading,
    WaitingForPrimaryInitializationToComplete,
    WaitingToStartSecondaryInitialization,
    WaitingToStartCdsInitialization,
    CdsInitialized,
    AllClustersInitialized,
}

type InitCb = Box<dyn FnOnce() + Send>;

struct InitState {
    phase: InitPhase,
    primary: HashSet<String>,
    secondary: HashSet<String>,
    primary_clusters_initialized_cb: Option<InitCb>,
    initialized_cb: Option<InitCb>,
}

/// drives clusters through the two initialization waves.
///
/// primary clusters initialize as soon as static loading completes; once
/// the primary bucket empties the secondary wave starts; with no cds
/// provider in scope the cds phase completes immediately and the overall
/// callback fires.
pub struct ClusterManagerInitHelper {
    me: std::sync::Weak<ClusterManagerInitHelper>,
    state: Mutex<InitState>,
    pending_initialize: Mutex<Vec<Arc<Cluster>>>,
}

impl ClusterManagerInitHelper {
    pub fn new() -> Arc<ClusterManagerInitHelper> {
        Arc::new_cyclic(|me| ClusterManagerInitHelper {
            me: me.clone(),
            state: Mutex::new(InitState {
                phase: InitPhase::Loading,
                primary: HashSet::new(),
                secondary: HashSet::new(),
                primary_clusters_initialized_cb: None,
                initialized_cb: None,
            }),
            pending_initialize: Mutex::new(Vec::new()),
        })
    }

    pub fn phase(&self) -> InitPhase {
        self.state.lock().phase
    }

    pub fn set_primary_clusters_initialized_cb<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().primary_clusters_initialized_cb = Some(Box::new(cb));
    }

    pub fn set_initialized_cb<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().initialized_cb = Some(Box::new(cb));
    }

    /// bucket a cluster; during loading initialization is deferred until
    /// `on_static_load_complete`, afterwards it starts right away
    pub fn add_cluster(&self, cluster: Arc<Cluster>) {
        let name = cluster.info().name().to_string();
        let start_now = {
            let mut state = self.state.lock();
            match cluster.initialize_phase() {
                InitializePhase::Primary => state.primary.insert(name),
                InitializePhase::Secondary => state.secondary.insert(name),
            };
            state.phase != InitPhase::Loading
        };
        if start_now {
            self.initialize_cluster(cluster);
        } else {
            self.pending_initialize.lock().push(cluster);
        }
    }

    /// static config is fully loaded; kick off the primary wave
    pub fn on_static_load_complete(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != InitPhase::Loading {
                return;
            }
            state.phase = InitPhase::WaitingForPrimaryInitializationToComplete;
        }
        let pending: Vec<Arc<Cluster>> = self.pending_initialize.lock().drain(..).collect();
        for cluster in pending {
            self.initialize_cluster(cluster);
        }
        self.maybe_advance();
    }

    fn initialize_cluster(&self, cluster: Arc<Cluster>) {
        let weak = self.me.clone();
        let name = cluster.info().name().to_string();
        cluster.initialize(move || {
            if let Some(helper) = weak.upgrade() {
                helper.on_cluster_initialized(&name);
            }
        });
    }

    fn on_cluster_initialized(&self, name: &str) {
        {
            let mut state = self.state.lock();
            state.primary.remove(name);
            state.secondary.remove(name);
        }
        self.maybe_advance();
    }

    fn maybe_advance(&self) {
        let mut to_fire: Vec<InitCb> = Vec::new();
        {
            let mut state = self.state.lock();
            if state.phase == InitPhase::WaitingForPrimaryInitializationToComplete
                && state.primary.is_empty()
            {
                if let Some(cb) = state.primary_clusters_initialized_cb.take() {
                    to_fire.push(cb);
                }
                state.phase = InitPhase::WaitingToStartSecondaryInitialization;
            }
            if state.phase == InitPhase::WaitingToStartSecondaryInitialization
                && state.secondary.is_empty()
            {
                // no cds provider in scope: the phase completes on the spot
                state.phase = InitPhase::WaitingToStartCdsInitialization;
                state.phase = InitPhase::CdsInitialized;
                state.phase = InitPhase::AllClustersInitialized;
                if let Some(cb) = state.initialized_cb.take() {
                    to_fire.push(cb);
                }
            }
        }
        for cb in to_fire {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::cluster::ClusterInfo;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn static_clusters_complete_both_waves() {
        let helper = ClusterManagerInitHelper::new();
        let primary_done = Arc::new(AtomicBool::new(false));
        let all_done = Arc::new(AtomicBool::new(false));
        let p = primary_done.clone();
        let a = all_done.clone();
        helper.set_primary_clusters_initialized_cb(move || p.store(true, Ordering::SeqCst));
        helper.set_initialized_cb(move || a.store(true, Ordering::SeqCst));

        helper.add_cluster(Cluster::new(ClusterInfo::for_tests("c1")));
        helper.add_cluster(Cluster::new(ClusterInfo::for_tests("c2")));
        assert_eq!(helper.phase(), InitPhase::Loading);
        assert!(!primary_done.load(Ordering::SeqCst));

        helper.on_static_load_complete();
        assert!(primary_done.load(Ordering::SeqCst));
        assert!(all_done.load(Ordering::SeqCst));
        assert_eq!(helper.phase(), InitPhase::AllClustersInitialized);
    }

    #[test]
    fn empty_config_initializes_immediately() {
        let helper = ClusterManagerInitHelper::new();
        let all_done = Arc::new(AtomicBool::new(false));
        let a = all_done.clone();
        helper.set_initialized_cb(move || a.store(true, Ordering::SeqCst));
        helper.on_static_load_complete();
        assert!(all_done.load(Ordering::SeqCst));
    }

    #[test]
    fn clusters_added_after_load_initialize_inline() {
        let helper = ClusterManagerInitHelper::new();
        helper.on_static_load_complete();
        helper.add_cluster(Cluster::new(ClusterInfo::for_tests("late")));
        assert_eq!(helper.phase(), InitPhase::AllClustersInitialized);
    }
}
