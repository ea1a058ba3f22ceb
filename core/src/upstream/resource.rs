use std::sync::atomic::{AtomicUsize, Ordering};

/// a capped counter; checks and movements are independent so callers
/// decide whether to check-then-create or create-then-account
#[derive(Debug)]
pub struct Gauge {
    count: AtomicUsize,
    max: usize,
}

impl Gauge {
    fn new(max: usize) -> Self {
        Gauge {
            count: AtomicUsize::new(0),
            max,
        }
    }

    pub fn can_create(&self) -> bool {
        self.count.load(Ordering::Relaxed) < self.max
    }

    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let prev = self.count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "resource gauge underflow");
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// per-priority limits, the knobs of the cluster config
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_connections: usize,
    pub max_pending_requests: usize,
    pub max_requests: usize,
    pub max_retries: usize,
    pub max_connections_per_host: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_connections: 1024,
            max_pending_requests: 1024,
            max_requests: 1024,
            max_retries: 3,
            max_connections_per_host: 1024,
        }
    }
}

/// live usage against one priority's limits
#[derive(Debug)]
pub struct PriorityResources {
    pub connections: Gauge,
    pub pending_requests: Gauge,
    pub requests: Gauge,
    pub retries: Gauge,
    pub max_connections_per_host: usize,
}

impl PriorityResources {
    fn new(limits: &ResourceLimits) -> Self {
        PriorityResources {
            connections: Gauge::new(limits.max_connections),
            pending_requests: Gauge::new(limits.max_pending_requests),
            requests: Gauge::new(limits.max_requests),
            retries: Gauge::new(limits.max_retries),
            max_connections_per_host: limits.max_connections_per_host,
        }
    }
}

/// resource accounting for one cluster, split by priority.
/// priority 0 is the default band, 1 the high band.
#[derive(Debug)]
pub struct ResourceManager {
    priorities: Vec<PriorityResources>,
}

pub const NUM_PRIORITIES: usize = 2;

impl ResourceManager {
    pub fn new(limits: &[ResourceLimits]) -> Self {
        let mut priorities = Vec::with_capacity(NUM_PRIORITIES);
        for i in 0..NUM_PRIORITIES {
            let limit = limits.get(i).copied().unwrap_or_default();
            priorities.push(PriorityResources::new(&limit));
        }
        ResourceManager { priorities }
    }

    pub fn resources(&self, priority: u32) -> &PriorityResources {
        let idx = (priority as usize).min(self.priorities.len() - 1);
        &self.priorities[idx]
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        ResourceManager::new(&[])
    }
}
