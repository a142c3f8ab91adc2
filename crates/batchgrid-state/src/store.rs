//! In-memory store of target states, keyed by target id.

use std::collections::HashMap;

use tracing::debug;

use batchgrid_core::TargetId;

use crate::types::TargetState;

/// Owns every [`TargetState`]. Only the scheduler holds one.
#[derive(Debug, Default)]
pub struct TargetStateStore {
    states: HashMap<TargetId, TargetState>,
}

impl TargetStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a target's state, creating it on first sight.
    pub fn get_or_create(&mut self, target: &str) -> &mut TargetState {
        if !self.states.contains_key(target) {
            debug!(%target, "tracking new target");
        }
        self.states.entry(target.to_string()).or_default()
    }

    pub fn get(&self, target: &str) -> Option<&TargetState> {
        self.states.get(target)
    }

    pub fn get_mut(&mut self, target: &str) -> Option<&mut TargetState> {
        self.states.get_mut(target)
    }

    pub fn contains(&self, target: &str) -> bool {
        self.states.contains_key(target)
    }

    /// Make the store track exactly `active`: create missing entries and
    /// drop the rest. Returns the dropped target ids.
    pub fn retain_active(&mut self, active: &[TargetId]) -> Vec<TargetId> {
        let mut dropped: Vec<TargetId> = self
            .states
            .keys()
            .filter(|id| !active.contains(*id))
            .cloned()
            .collect();
        dropped.sort();

        for id in &dropped {
            self.states.remove(id);
            debug!(target = %id, "target state dropped");
        }
        for id in active {
            self.get_or_create(id);
        }
        dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &TargetState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
