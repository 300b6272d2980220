//! Reorder Buffer: tracks in-flight fused uops in program order and retires
//! them, in order, once every uop that makes them up has executed.

use std::collections::VecDeque;

use tracing::trace;
use uarch_types::{EventLog, MicroArchConfig, Stage};

use crate::uop::{FusedUopId, InstanceId, UopArena};

struct RobEntry {
    fused: FusedUopId,
    instance: InstanceId,
    is_last_of_instance: bool,
}

/// The Reorder Buffer, sized in fused-domain slots (`rb_width`).
pub struct ReorderBuffer {
    entries: VecDeque<RobEntry>,
    capacity: u32,
}

impl ReorderBuffer {
    #[must_use]
    pub fn new(cfg: &MicroArchConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: cfg.rb_width,
        }
    }

    #[must_use]
    pub fn free_slots(&self) -> u32 {
        self.capacity - self.entries.len() as u32
    }

    /// Allocates an entry for `fused`. `is_last_of_instance` marks the
    /// final fused uop of its instruction instance, so retirement can stamp
    /// the instance's overall retire cycle.
    pub fn allocate(&mut self, fused: FusedUopId, instance: InstanceId, is_last_of_instance: bool) {
        self.entries.push_back(RobEntry {
            fused,
            instance,
            is_last_of_instance,
        });
    }

    /// Retires up to `retire_width` oldest fused uops whose every
    /// constituent uop has executed by `cycle`, in order, stopping at the
    /// first one that isn't ready yet. Returns how many retired.
    pub fn retire_cycle(
        &mut self,
        cfg: &MicroArchConfig,
        arena: &mut UopArena,
        events: &mut EventLog,
        cycle: u64,
    ) -> u32 {
        let mut retired = 0u32;
        while retired < cfg.retire_width {
            let Some(entry) = self.entries.front() else {
                break;
            };
            let fused = arena.fused(entry.fused);
            let all_executed = fused
                .uops
                .iter()
                .all(|&u| arena.uop(u).executed_cycle.is_some_and(|c| c <= cycle));
            if !all_executed {
                break;
            }

            let entry = self.entries.pop_front().expect("front checked above");
            for &uop_id in &arena.fused(entry.fused).uops.clone() {
                arena.uop_mut(uop_id).retired_cycle = Some(cycle);
            }
            if entry.is_last_of_instance {
                arena.instance_mut(entry.instance).retire_cycle = Some(cycle);
            }
            events.record_stage(cycle, Stage::Retired);
            retired += 1;
        }
        trace!(cycle, retired, "reorder buffer retired");
        retired
    }
}
