//! Run control: cooperative cancellation and the host's single-run slot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cs_types::{CsError, CsResult};

/// Cooperative cancellation flag, polled between steps and rounds.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Host-side run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
}

/// Allows at most one active scan at a time.
#[derive(Debug, Clone)]
pub struct ScanSlot {
    state: Arc<Mutex<RunState>>,
}

impl Default for ScanSlot {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RunState::Idle)),
        }
    }
}

impl ScanSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Claim the slot; fails with [`CsError::AlreadyRunning`] when busy.
    pub fn try_acquire(&self) -> CsResult<RunGuard> {
        let mut state = self.state.lock();
        if *state == RunState::Running {
            return Err(CsError::AlreadyRunning);
        }
        *state = RunState::Running;
        Ok(RunGuard {
            state: Arc::clone(&self.state),
        })
    }
}

/// Holds the slot in `Running` until dropped.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<Mutex<RunState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.state.lock() = RunState::Idle;
    }
}
