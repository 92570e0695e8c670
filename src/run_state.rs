use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Longest stretch a routine sleeps without looking at the cancel flag.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    CancelRequested,
}

impl RunPhase {
    const fn as_u8(self) -> u8 {
        match self {
            RunPhase::Idle => 0,
            RunPhase::Running => 1,
            RunPhase::CancelRequested => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunPhase::Running,
            2 => RunPhase::CancelRequested,
            _ => RunPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

/// Process-wide run flag. At most one run holds it at a time.
#[derive(Debug)]
pub struct RunState {
    phase: AtomicU8,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(RunPhase::Idle.as_u8()),
        }
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.phase() != RunPhase::Idle
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.phase() == RunPhase::CancelRequested
    }

    /// Claim the flag. False when a run is already active.
    pub fn try_begin(&self) -> bool {
        self.phase
            .compare_exchange(
                RunPhase::Idle.as_u8(),
                RunPhase::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Ask the active run to stop. False when nothing is running.
    pub fn request_cancel(&self) -> bool {
        match self.phase.compare_exchange(
            RunPhase::Running.as_u8(),
            RunPhase::CancelRequested.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => true,
            Err(current) => RunPhase::from_u8(current) == RunPhase::CancelRequested,
        }
    }

    pub fn finish(&self) {
        self.phase.store(RunPhase::Idle.as_u8(), Ordering::SeqCst);
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancel_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` in slices of at most [`CANCEL_CHECK_INTERVAL`],
    /// bailing out at the first slice boundary after a cancel request.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL)).await;
        }
    }
}

/// Returns the flag to idle when dropped, so a panicking run cannot wedge it.
pub(crate) struct FinishGuard<'a>(pub(crate) &'a RunState);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}
