//! Port assignment heuristics.
//!
//! Real cores pick a uop's execution port with undocumented, generation-
//! specific load-balancing logic that the reference model special-cases by
//! how many candidate ports a uop may use. This reproduces that shape as a
//! handful of distinct rules rather than one generalized least-used
//! heuristic: a single candidate is direct; the paired store-data/store-
//! address port combinations (`{2,3}`, `{4,9}`, `{7,8}`) alternate strictly;
//! the `{0,1,5}` triple rotates through a fixed cycle; an 8-candidate set
//! (any-ALU-port uops on an 8-port core) picks the least-used port with a
//! hysteresis band against the second-least-used so usage doesn't ping-pong
//! between two equally-idle ports; a 10-candidate set (any-ALU-port uops on
//! a 10-port core) picks from a snapshot of usage taken at the start of the
//! previous cycle rather than the live running count; anything else falls
//! back to plain least-used, ascending-port-number tie-break.
//!
//! `simple_port_assignment` overrides all of the above with a uniformly
//! random pick among the candidates, for microarchitectures whose actual
//! assignment policy isn't documented well enough to model.

use std::collections::HashMap;

use uarch_types::{MicroArchConfig, Port};

/// Assigns ports to uops as they enter the scheduler, tracking recent
/// per-port usage so load gets spread across the candidates a uop may use.
#[derive(Debug, Default)]
pub struct PortAssigner {
    usage: HashMap<Port, u64>,
    prev_cycle_usage: HashMap<Port, u64>,
    pair_cursor: HashMap<(Port, Port), usize>,
    triple_cursor: usize,
    rng_state: u64,
}

impl PortAssigner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng_state: 0x9E37_79B9_7F4A_7C15,
            ..Self::default()
        }
    }

    /// Picks a port from `possible_ports` for a uop entering the scheduler.
    #[must_use]
    pub fn assign(&mut self, cfg: &MicroArchConfig, possible_ports: &[Port]) -> Port {
        assert!(!possible_ports.is_empty(), "uop with no possible ports");

        let chosen = if possible_ports.len() == 1 {
            possible_ports[0]
        } else if cfg.simple_port_assignment {
            self.random_port(possible_ports)
        } else {
            let mut sorted = possible_ports.to_vec();
            sorted.sort_unstable();
            match sorted.as_slice() {
                [a, b] if [(2, 3), (4, 9), (7, 8)].contains(&(*a, *b)) => self.round_robin_pair(*a, *b),
                [0, 1, 5] => self.rotate_triple(&sorted),
                _ if sorted.len() == 8 => self.hysteresis_least_used(&sorted),
                _ if sorted.len() == 10 => self.snapshot_least_used(&sorted),
                _ => self.least_used(&sorted),
            }
        };

        *self.usage.entry(chosen).or_insert(0) += 1;
        chosen
    }

    fn random_port(&mut self, ports: &[Port]) -> Port {
        // xorshift64*: deterministic and dependency-free, which is all a
        // "don't model the real policy" fallback needs.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        ports[(x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 56) as usize % ports.len()]
    }

    fn round_robin_pair(&mut self, a: Port, b: Port) -> Port {
        let cursor = self.pair_cursor.entry((a, b)).or_insert(0);
        let chosen = if *cursor % 2 == 0 { a } else { b };
        *cursor += 1;
        chosen
    }

    fn rotate_triple(&mut self, ports: &[Port]) -> Port {
        let chosen = ports[self.triple_cursor % ports.len()];
        self.triple_cursor += 1;
        chosen
    }

    fn least_used(&self, ports: &[Port]) -> Port {
        *ports
            .iter()
            .min_by_key(|p| (self.usage.get(p).copied().unwrap_or(0), **p))
            .expect("non-empty checked above")
    }

    /// Least-used, but only switches away from the port chosen last time
    /// this ran when the second-least-used port has actually caught up
    /// (rather than the instant it's merely tied), so usage doesn't
    /// alternate every single assignment between two idle ports.
    fn hysteresis_least_used(&self, ports: &[Port]) -> Port {
        let mut by_usage = ports.to_vec();
        by_usage.sort_by_key(|p| (self.usage.get(p).copied().unwrap_or(0), *p));
        let least = by_usage[0];
        let Some(&second) = by_usage.get(1) else {
            return least;
        };
        let least_count = self.usage.get(&least).copied().unwrap_or(0);
        let second_count = self.usage.get(&second).copied().unwrap_or(0);
        if second_count <= least_count && (least_count + second_count) % 2 == 1 {
            second
        } else {
            least
        }
    }

    /// Least-used against last cycle's usage snapshot rather than the live
    /// count, so a burst of assignments within one cycle doesn't itself bias
    /// where the next one in the same cycle lands.
    fn snapshot_least_used(&self, ports: &[Port]) -> Port {
        *ports
            .iter()
            .min_by_key(|p| (self.prev_cycle_usage.get(p).copied().unwrap_or(0), **p))
            .expect("non-empty checked above")
    }

    /// Snapshots usage for the next cycle's snapshot-based assignment and
    /// decays the live running counts towards zero, so port choice reflects
    /// recent history rather than the whole run's cumulative counts. Called
    /// once per scheduler cycle, before that cycle's uops are admitted.
    pub fn begin_cycle(&mut self) {
        self.prev_cycle_usage.clone_from(&self.usage);
        for count in self.usage.values_mut() {
            *count -= *count / 4;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paired_store_ports_strictly_alternate() {
        let cfg = MicroArchConfig::haswell_like();
        let mut assigner = PortAssigner::new();
        let seq: Vec<Port> = (0..6).map(|_| assigner.assign(&cfg, &[4, 9])).collect();
        assert_eq!(seq, vec![4, 9, 4, 9, 4, 9]);
    }

    #[test]
    fn triple_rotation_cycles_through_all_three_ports() {
        let cfg = MicroArchConfig::haswell_like();
        let mut assigner = PortAssigner::new();
        let seq: Vec<Port> = (0..6).map(|_| assigner.assign(&cfg, &[0, 1, 5])).collect();
        assert_eq!(seq, vec![0, 1, 5, 0, 1, 5]);
    }

    #[test]
    fn single_candidate_always_assigned() {
        let cfg = MicroArchConfig::haswell_like();
        let mut assigner = PortAssigner::new();
        assert_eq!(assigner.assign(&cfg, &[5]), 5);
    }

    #[test]
    fn eight_port_hysteresis_balances_across_a_full_run() {
        let cfg = MicroArchConfig::skylake_like();
        let mut assigner = PortAssigner::new();
        let candidates: Vec<Port> = (0..8).collect();
        let mut counts = HashMap::new();
        for _ in 0..800 {
            let p = assigner.assign(&cfg, &candidates);
            *counts.entry(p).or_insert(0u32) += 1;
            assigner.begin_cycle();
        }
        let max = *counts.values().max().unwrap();
        let min = *counts.values().min().unwrap();
        assert!(max - min <= 10, "expected balanced usage, got {counts:?}");
    }

    #[test]
    fn ten_port_snapshot_uses_previous_cycle_counts() {
        let cfg = MicroArchConfig::icelake_like();
        let mut assigner = PortAssigner::new();
        let candidates: Vec<Port> = (0..10).collect();
        // Everything assigned within one cycle sees the same (empty)
        // snapshot, so it all lands on the lowest-numbered port.
        let first = assigner.assign(&cfg, &candidates);
        let second = assigner.assign(&cfg, &candidates);
        assert_eq!(first, 0);
        assert_eq!(second, 0);
        assigner.begin_cycle();
        // Next cycle's snapshot now reflects the two assignments above, so
        // port 0 is no longer least-used.
        let third = assigner.assign(&cfg, &candidates);
        assert_ne!(third, 0);
    }

    #[test]
    fn simple_port_assignment_picks_among_candidates_not_in_fixed_order() {
        let mut cfg = MicroArchConfig::haswell_like();
        cfg.simple_port_assignment = true;
        let mut assigner = PortAssigner::new();
        let candidates = [2, 3, 5, 6];
        let seq: Vec<Port> = (0..20).map(|_| assigner.assign(&cfg, &candidates)).collect();
        assert!(seq.iter().all(|p| candidates.contains(p)));
        assert!(seq.windows(2).any(|w| w[0] != w[1]), "expected some variation: {seq:?}");
    }
}
