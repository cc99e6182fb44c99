//! Slot table: one lifecycle record per requested container.
//!
//! Requests are fungible, so an allocation claims the lowest slot still in
//! `Requested`. Once claimed, the slot is keyed by the allocation's
//! container id so the completion status can find it again.

use std::collections::HashMap;

use gridcrawl_core::{Allocation, ContainerExit, ContainerId, ContainerStatus, HostName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Request issued, no allocation yet.
    Requested,
    /// Allocation claimed, start call in flight.
    Launching {
        container_id: ContainerId,
        host: HostName,
    },
    Launched {
        container_id: ContainerId,
        host: HostName,
    },
    /// The node agent refused the start call. The slot is never refilled.
    LaunchFailed {
        container_id: ContainerId,
        reason: String,
    },
    Completed {
        container_id: ContainerId,
        exit: ContainerExit,
    },
}

/// Number of slots in each state, plus completions that matched no slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub requested: usize,
    pub launching: usize,
    pub launched: usize,
    pub launch_failed: usize,
    pub completed: usize,
    pub untracked_completions: usize,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<SlotState>,
    by_container: HashMap<ContainerId, usize>,
    untracked_completions: usize,
}

impl SlotTable {
    /// A table with `count` slots in `Requested`.
    pub fn with_requested(count: usize) -> Self {
        Self {
            slots: vec![SlotState::Requested; count],
            by_container: HashMap::new(),
            untracked_completions: 0,
        }
    }

    /// Claim a slot for `allocation` and mark it `Launching`.
    ///
    /// Allocations beyond the number of requests get a new slot appended.
    pub fn claim(&mut self, allocation: &Allocation) -> usize {
        let state = SlotState::Launching {
            container_id: allocation.id.clone(),
            host: allocation.host.clone(),
        };

        let index = match self
            .slots
            .iter()
            .position(|slot| matches!(slot, SlotState::Requested))
        {
            Some(index) => {
                self.slots[index] = state;
                index
            }
            None => {
                self.slots.push(state);
                self.slots.len() - 1
            }
        };

        self.by_container.insert(allocation.id.clone(), index);
        index
    }

    /// `Launching` → `Launched`. A completion that raced ahead of the start
    /// call's return is kept.
    pub fn mark_launched(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let SlotState::Launching { container_id, host } = slot {
                *slot = SlotState::Launched {
                    container_id: std::mem::take(container_id),
                    host: std::mem::take(host),
                };
            }
        }
    }

    /// `Launching` → `LaunchFailed`.
    pub fn mark_launch_failed(&mut self, index: usize, reason: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let SlotState::Launching { container_id, .. } = slot {
                *slot = SlotState::LaunchFailed {
                    container_id: std::mem::take(container_id),
                    reason: reason.into(),
                };
            }
        }
    }

    /// Record a completion. Returns the slot index, or `None` when the
    /// container was never claimed here.
    pub fn record_completion(&mut self, status: &ContainerStatus) -> Option<usize> {
        match self.by_container.get(&status.container_id) {
            Some(&index) => {
                self.slots[index] = SlotState::Completed {
                    container_id: status.container_id.clone(),
                    exit: status.exit,
                };
                Some(index)
            }
            None => {
                self.untracked_completions += 1;
                None
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&SlotState> {
        self.slots.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn counts(&self) -> SlotCounts {
        let mut counts = SlotCounts {
            untracked_completions: self.untracked_completions,
            ..SlotCounts::default()
        };
        for slot in &self.slots {
            match slot {
                SlotState::Requested => counts.requested += 1,
                SlotState::Launching { .. } => counts.launching += 1,
                SlotState::Launched { .. } => counts.launched += 1,
                SlotState::LaunchFailed { .. } => counts.launch_failed += 1,
                SlotState::Completed { .. } => counts.completed += 1,
            }
        }
        counts
    }
}
