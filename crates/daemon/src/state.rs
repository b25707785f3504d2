//! Run registry
//!
//! In-memory table of runs keyed by [`RunId`]. Each entry is guarded by its
//! own shard lock, so writers on different runs never contend. Every method
//! takes and releases the entry lock internally; no reference into the table
//! escapes, and phase changes are compare-and-set against the entry's current
//! phase.

use crate::driver::ProcessHandle;
use dashmap::DashMap;
use runwright_common::{Agent, Error, Phase, Report, Result, Run, RunId};
use std::sync::Arc;
use tracing::debug;

/// Registry entry: the run plus its live process, if any
struct RunEntry {
    run: Run,
    process: Option<ProcessHandle>,
}

/// Merge-style update; unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    /// Raised to this value, never lowered
    pub progress: Option<u8>,
}

/// Shared registry of all runs known to this daemon
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<RunId, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh run in `initializing` and return its id.
    pub fn create(&self, url: String, agents: Vec<Agent>) -> RunId {
        let run = Run::new(url, agents);
        let id = run.id;
        self.runs.insert(id, RunEntry { run, process: None });
        debug!("Registered run {}", id);
        id
    }

    /// Insert an already-built run (used for runs that never execute).
    pub fn insert(&self, run: Run) -> RunId {
        let id = run.id;
        self.runs.insert(id, RunEntry { run, process: None });
        id
    }

    /// Snapshot of a run
    pub fn get(&self, id: &RunId) -> Option<Run> {
        self.runs.get(id).map(|e| e.run.clone())
    }

    pub fn contains(&self, id: &RunId) -> bool {
        self.runs.contains_key(id)
    }

    /// Apply a patch. Returns `false` when the run is unknown.
    pub fn update(&self, id: &RunId, patch: RunPatch) -> bool {
        let Some(mut entry) = self.runs.get_mut(id) else {
            return false;
        };
        if let Some(progress) = patch.progress {
            entry.run.progress = entry.run.progress.max(progress.min(100));
        }
        true
    }

    /// Move a non-terminal run forward to `phase`, raising progress to at
    /// least `progress`.
    pub fn advance(&self, id: &RunId, phase: Phase, progress: u8) -> Result<()> {
        let mut entry = self.runs.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        let run = &mut entry.run;

        if run.phase.is_terminal() {
            return Err(Error::AlreadyTerminal {
                id: *id,
                phase: run.phase,
            });
        }
        if phase.is_terminal() || !run.phase.can_advance_to(phase) {
            return Err(Error::InvalidStateTransition {
                from: run.phase,
                to: phase,
            });
        }

        debug!("Run {} {} -> {}", id, run.phase, phase);
        run.phase = phase;
        run.progress = run.progress.max(progress.min(99));
        Ok(())
    }

    /// Add `step` to progress while executing, never exceeding `cap`.
    ///
    /// Returns the resulting progress, or `None` when the run is unknown or
    /// no longer executing.
    pub fn nudge_progress(&self, id: &RunId, step: u8, cap: u8) -> Option<u8> {
        let mut entry = self.runs.get_mut(id)?;
        let run = &mut entry.run;
        if run.phase != Phase::Executing {
            return None;
        }
        if run.progress < cap {
            run.progress = run.progress.saturating_add(step).min(cap);
        }
        Some(run.progress)
    }

    /// Write the terminal state and report in one step.
    ///
    /// Fails with `AlreadyTerminal` if another writer got there first; the
    /// caller's result is then discarded untouched.
    pub fn finalize(&self, id: &RunId, phase: Phase, report: Report) -> Result<()> {
        if !phase.is_terminal() {
            return Err(Error::Internal(format!(
                "finalize called with non-terminal phase {}",
                phase
            )));
        }

        let mut entry = self.runs.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        let run = &mut entry.run;

        if run.completed || run.phase.is_terminal() {
            return Err(Error::AlreadyTerminal {
                id: *id,
                phase: run.phase,
            });
        }

        run.phase = phase;
        run.progress = 100;
        run.completed = true;
        run.report = Some(report);
        Ok(())
    }

    /// Record the live process of a run. Refused once the run is terminal,
    /// in which case the caller owns stopping it.
    pub fn attach_process(&self, id: &RunId, handle: ProcessHandle) -> Result<()> {
        let mut entry = self.runs.get_mut(id).ok_or_else(|| Error::not_found(id))?;
        if entry.run.phase.is_terminal() {
            return Err(Error::AlreadyTerminal {
                id: *id,
                phase: entry.run.phase,
            });
        }
        entry.run.pid = handle.pid();
        entry.process = Some(handle);
        Ok(())
    }

    /// Detach and return the live process of a run, if any.
    pub fn take_process(&self, id: &RunId) -> Option<ProcessHandle> {
        let mut entry = self.runs.get_mut(id)?;
        entry.run.pid = None;
        entry.process.take()
    }

    pub fn has_process(&self, id: &RunId) -> bool {
        self.runs
            .get(id)
            .map(|e| e.process.is_some())
            .unwrap_or(false)
    }

    /// Evict a run.
    pub fn remove(&self, id: &RunId) -> Option<Run> {
        self.runs.remove(id).map(|(_, e)| e.run)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn ids(&self) -> Vec<RunId> {
        self.runs.iter().map(|e| *e.key()).collect()
    }
}
