use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::network::Address;

use super::host::Host;

/// the hosts of one priority inside one cluster.
/// degraded/excluded are carried for parity with the health model but stay
/// empty in this scope: every host is treated healthy.
#[derive(Clone, Debug, Default)]
pub struct HostSet {
    pub hosts: Vec<Arc<Host>>,
    pub healthy_hosts: Vec<Arc<Host>>,
    pub degraded_hosts: Vec<Arc<Host>>,
    pub excluded_hosts: Vec<Arc<Host>>,
}

impl HostSet {
    fn rebuild(hosts: Vec<Arc<Host>>) -> HostSet {
        HostSet {
            healthy_hosts: hosts.clone(),
            hosts,
            degraded_hosts: Vec::new(),
            excluded_hosts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

type MemberUpdateCb = Box<dyn Fn(u32, &[Arc<Host>], &[Arc<Host>]) + Send + Sync>;

/// host sets ordered by priority; 0 is served before 1
pub struct PrioritySet {
    host_sets: RwLock<Vec<HostSet>>,
    member_update_cbs: Mutex<Vec<MemberUpdateCb>>,
}

impl PrioritySet {
    pub fn new() -> Self {
        PrioritySet {
            host_sets: RwLock::new(Vec::new()),
            member_update_cbs: Mutex::new(Vec::new()),
        }
    }

    /// snapshot of the host set at one priority
    pub fn host_set(&self, priority: u32) -> HostSet {
        self.host_sets
            .read()
            .get(priority as usize)
            .cloned()
            .unwrap_or_default()
    }

    pub fn num_priorities(&self) -> usize {
        self.host_sets.read().len()
    }

    /// all hosts across priorities
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.host_sets
            .read()
            .iter()
            .flat_map(|set| set.hosts.iter().cloned())
            .collect()
    }

    /// replace membership at one priority, reporting the delta
    pub fn update_hosts(&self, priority: u32, added: Vec<Arc<Host>>, removed: Vec<Arc<Host>>) {
        {
            let mut sets = self.host_sets.write();
            while sets.len() <= priority as usize {
                sets.push(HostSet::default());
            }
            let current = &mut sets[priority as usize];
            let mut hosts = current.hosts.clone();
            hosts.retain(|h| {
                !removed
                    .iter()
                    .any(|r| std::ptr::eq(Arc::as_ptr(r), Arc::as_ptr(h)))
            });
            for host in &added {
                if !hosts
                    .iter()
                    .any(|h| std::ptr::eq(Arc::as_ptr(h), Arc::as_ptr(host)))
                {
                    hosts.push(host.clone());
                }
            }
            *current = HostSet::rebuild(hosts);
        }
        for cb in self.member_update_cbs.lock().iter() {
            cb(priority, &added, &removed);
        }
    }

    /// observe every later membership change
    pub fn add_member_update_cb<F>(&self, cb: F)
    where
        F: Fn(u32, &[Arc<Host>], &[Arc<Host>]) + Send + Sync + 'static,
    {
        self.member_update_cbs.lock().push(Box::new(cb));
    }

    /// per-worker copy sharing the host `Arc`s but not the callbacks
    pub fn clone_membership(&self) -> PrioritySet {
        let clone = PrioritySet::new();
        {
            let mut sets = clone.host_sets.write();
            *sets = self.host_sets.read().clone();
        }
        clone
    }
}

impl Default for PrioritySet {
    fn default() -> Self {
        PrioritySet::new()
    }
}

/// the main thread's priority set: adds the cross-priority address map,
/// rebuilt as a fresh snapshot on every membership change
pub struct MainPrioritySet {
    inner: PrioritySet,
    hosts_by_address: ArcSwap<HashMap<Address, Arc<Host>>>,
}

impl MainPrioritySet {
    pub fn new() -> Self {
        MainPrioritySet {
            inner: PrioritySet::new(),
            hosts_by_address: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn priority_set(&self) -> &PrioritySet {
        &self.inner
    }

    pub fn host_set(&self, priority: u32) -> HostSet {
        self.inner.host_set(priority)
    }

    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.inner.all_hosts()
    }

    pub fn find_host(&self, address: &Address) -> Option<Arc<Host>> {
        self.hosts_by_address.load().get(address).cloned()
    }

    pub fn update_hosts(&self, priority: u32, added: Vec<Arc<Host>>, removed: Vec<Arc<Host>>) {
        self.inner.update_hosts(priority, added, removed);
        let mut map = HashMap::new();
        for host in self.inner.all_hosts() {
            map.insert(host.address().clone(), host);
        }
        self.hosts_by_address.store(Arc::new(map));
    }

    pub fn add_member_update_cb<F>(&self, cb: F)
    where
        F: Fn(u32, &[Arc<Host>], &[Arc<Host>]) + Send + Sync + 'static,
    {
        self.inner.add_member_update_cb(cb);
    }
}

impl Default for MainPrioritySet {
    fn default() -> Self {
        MainPrioritySet::new()
    }
}
