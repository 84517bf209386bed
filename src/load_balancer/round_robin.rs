//! Round-robin load balancing strategy.
//!
//! Used when an upstream cannot get a counter block from the shared zone,
//! or when fair scheduling is switched off. Rotates through healthy
//! backends without looking at load.

use crate::load_balancer::peer::{Busy, RequestPeerState};
use crate::load_balancer::pool::BackendGroup;
use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// The rotation itself lives in the group cursor and the request state.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select_peer(
        &self,
        group: &BackendGroup,
        state: &mut RequestPeerState,
        now_ms: u64,
    ) -> Result<usize, Busy> {
        let len = group.len();
        if len == 0 {
            return Err(Busy);
        }

        state.advance(len);
        let start = state.current();

        for i in 0..len {
            let index = (start + i) % len;
            if state.is_tried(index) {
                continue;
            }
            if group.backends()[index].check_available(now_ms) {
                state.set_current(index);
                state.mark_tried(index);
                return Ok(index);
            }
        }
        Err(Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::Backend;
    use crate::zone::Generation;

    fn group() -> BackendGroup {
        let b1 = Backend::new("127.0.0.1:8080".parse().unwrap(), 1);
        let b2 = Backend::new("127.0.0.1:8081".parse().unwrap(), 1);
        BackendGroup::new("web", Generation(1), vec![b1, b2])
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let group = group();

        let mut picks = Vec::new();
        for _ in 0..3 {
            let mut state = RequestPeerState::new(group.next_start(), group.len());
            picks.push(lb.select_peer(&group, &mut state, 0).unwrap());
        }
        assert_eq!(picks, vec![1, 0, 1]);
    }

    #[test]
    fn test_round_robin_skips_down() {
        let lb = RoundRobin::new();
        let b1 = Backend::new("127.0.0.1:8080".parse().unwrap(), 1).with_down(true);
        let b2 = Backend::new("127.0.0.1:8081".parse().unwrap(), 1);
        let group = BackendGroup::new("web", Generation(1), vec![b1, b2]);

        for start in 0..4 {
            let mut state = RequestPeerState::new(start, group.len());
            assert_eq!(lb.select_peer(&group, &mut state, 0), Ok(1));
            assert_eq!(lb.select_peer(&group, &mut state, 0), Err(Busy));
        }
    }
}
