//! Member selection for operations that have no routing target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::config::LoadBalancerKind;
use crate::listener::Member;

/// A strategy for picking the member a non-routed operation is sent to.
pub trait LoadBalancer: Send + Sync {
    /// Selects one of `members`; `None` if the slice is empty.
    fn select<'a>(&self, members: &'a [Member]) -> Option<&'a Member>;
}

impl std::fmt::Debug for dyn LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoadBalancer")
    }
}

/// Cycles through members in order.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Creates a new round-robin load balancer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select<'a>(&self, members: &'a [Member]) -> Option<&'a Member> {
        if members.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % members.len();
        members.get(idx)
    }
}

/// Picks a member uniformly at random.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Creates a new random load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn select<'a>(&self, members: &'a [Member]) -> Option<&'a Member> {
        if members.is_empty() {
            return None;
        }
        members.get(rand::thread_rng().gen_range(0..members.len()))
    }
}

/// Creates the load balancer selected in configuration.
pub fn load_balancer_for(kind: LoadBalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobinLoadBalancer::new()),
        LoadBalancerKind::Random => Arc::new(RandomLoadBalancer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Address;

    fn create_test_members(count: u16) -> Vec<Member> {
        (0..count)
            .map(|i| Member::new(uuid::Uuid::new_v4(), Address::new("127.0.0.1", 5701 + i)))
            .collect()
    }

    #[test]
    fn test_empty_members() {
        assert!(RoundRobinLoadBalancer::new().select(&[]).is_none());
        assert!(RandomLoadBalancer::new().select(&[]).is_none());
    }

    #[test]
    fn test_round_robin_cycles_through_members() {
        let lb = RoundRobinLoadBalancer::new();
        let members = create_test_members(3);

        for _ in 0..3 {
            for member in &members {
                assert_eq!(lb.select(&members).unwrap().uuid(), member.uuid());
            }
        }
    }

    #[test]
    fn test_random_selects_from_members() {
        let lb = RandomLoadBalancer::new();
        let members = create_test_members(5);

        for _ in 0..20 {
            let selected = lb.select(&members).unwrap();
            assert!(members.iter().any(|m| m.uuid() == selected.uuid()));
        }
    }

    #[test]
    fn test_load_balancer_for_config() {
        let members = create_test_members(2);
        for kind in [LoadBalancerKind::RoundRobin, LoadBalancerKind::Random] {
            assert!(load_balancer_for(kind).select(&members).is_some());
        }
    }
}
