//! Model Rotator (§4.6): two ordered pools of `(tool, model)` pairs, a
//! round-robin index into each, and a one-way (but idempotent)
//! `switch_to_fallback`. `reset_fallback` is called at the start of every
//! Scheduler iteration so each task gets a fresh shot at the primary pool.

use serde::{Deserialize, Serialize};

/// One selectable (tool, model) entry in a rotator pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSlot {
    pub name: String,
    pub tool: String,
    pub model: String,
}

impl ModelSlot {
    pub fn new(name: impl Into<String>, tool: impl Into<String>, model: impl Into<String>) -> Self {
        Self { name: name.into(), tool: tool.into(), model: model.into() }
    }
}

/// Round-robin selector over a primary (`exec`) and `fallback` pool.
#[derive(Debug, Clone)]
pub struct Rotator {
    exec: Vec<ModelSlot>,
    fallback: Vec<ModelSlot>,
    exec_index: usize,
    fallback_index: usize,
    use_fallback: bool,
}

impl Rotator {
    pub fn new(exec: Vec<ModelSlot>, fallback: Vec<ModelSlot>) -> Self {
        Self { exec, fallback, exec_index: 0, fallback_index: 0, use_fallback: false }
    }

    /// Total number of attempts available across both pools, the executor's
    /// cap on retries within a single invocation.
    pub fn total_slots(&self) -> usize {
        self.exec.len() + self.fallback.len()
    }

    pub fn primary_len(&self) -> usize {
        self.exec.len()
    }

    pub fn is_using_fallback(&self) -> bool {
        self.use_fallback
    }

    /// Advance and return the next viable slot, drawing from `fallback` once
    /// `switch_to_fallback` has been engaged.
    pub fn next(&mut self) -> Option<&ModelSlot> {
        if self.use_fallback {
            if self.fallback.is_empty() {
                return None;
            }
            let slot = &self.fallback[self.fallback_index % self.fallback.len()];
            self.fallback_index = self.fallback_index.wrapping_add(1);
            Some(slot)
        } else {
            if self.exec.is_empty() {
                return None;
            }
            let slot = &self.exec[self.exec_index % self.exec.len()];
            self.exec_index = self.exec_index.wrapping_add(1);
            Some(slot)
        }
    }

    /// Engage the fallback pool. Idempotent: calling this twice in a row
    /// leaves the rotator in the same state as calling it once.
    pub fn switch_to_fallback(&mut self) {
        self.use_fallback = true;
    }

    /// Reset to the primary pool without resetting its round-robin index,
    /// called at the start of every Scheduler iteration.
    pub fn reset_fallback(&mut self) {
        self.use_fallback = false;
    }
}
