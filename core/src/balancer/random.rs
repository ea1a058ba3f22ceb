use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::upstream::host::Host;
use crate::upstream::host_set::HostSet;

use super::LoadBalancer;

/// uniform pick over the host set.
/// the prng is injected through the seed so tests and reruns can be exact.
pub struct RandomBalancer {
    rng: Mutex<StdRng>,
}

impl RandomBalancer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RandomBalancer {
            rng: Mutex::new(rng),
        }
    }
}

impl LoadBalancer for RandomBalancer {
    fn choose_host(&self, hosts: &HostSet) -> Option<Arc<Host>> {
        let candidates = &hosts.healthy_hosts;
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.lock().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::testing::make_hosts;
    use std::collections::HashMap;

    #[test]
    fn same_seed_same_sequence() {
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002", "127.0.0.1:8003"]);
        let run = |seed| -> Vec<String> {
            let lb = RandomBalancer::new(Some(seed));
            (0..16)
                .map(|_| lb.choose_host(&hosts).unwrap().address().to_string())
                .collect()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn covers_the_whole_set() {
        let hosts = make_hosts(&["127.0.0.1:8001", "127.0.0.1:8002"]);
        let lb = RandomBalancer::new(Some(42));
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..200 {
            let pick = lb.choose_host(&hosts).unwrap().address().to_string();
            *counts.entry(pick).or_insert(0) += 1;
        }
        assert!(counts.len() == 2, "both hosts should be hit: {:?}", counts);
    }

    #[test]
    fn empty_set_yields_none() {
        let lb = RandomBalancer::new(Some(1));
        assert!(lb.choose_host(&HostSet::default()).is_none());
    }
}
