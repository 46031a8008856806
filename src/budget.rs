//! Wall-clock budget and cancellation shared by every stage of a run.
//!
//! A single [`RunBudget`] is created when the process starts. Loops that can
//! overrun call [`RunBudget::check`] at their checkpoints and stop cleanly
//! when it reports a [`StopReason`]. Clones share the cancellation flag, so
//! a Ctrl-C handler holding one clone stops every stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The run exceeded its wall-clock budget
    BudgetExhausted,
    /// An operator interrupted the run
    Cancelled,
}

impl std::fmt::Display for StopReason {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            StopReason::BudgetExhausted => write!(f, "runtime budget exhausted"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunBudget {
    started: Instant,
    max_runtime: Duration,
    cancelled: Arc<AtomicBool>,
}

impl RunBudget {
    #[inline]
    pub fn new(max_runtime: Duration) -> Self {
        Self::starting_at(Instant::now(), max_runtime)
    }

    /// Budget whose clock started at `started`
    #[inline]
    pub fn starting_at(started: Instant, max_runtime: Duration) -> Self {
        Self {
            started,
            max_runtime,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[inline]
    pub fn remaining(&self) -> Duration {
        self.max_runtime.saturating_sub(self.elapsed())
    }

    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Some` once the run must stop; cancellation wins over the deadline
    #[inline]
    pub fn check(&self) -> Option<StopReason> {
        if self.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.elapsed() > self.max_runtime {
            Some(StopReason::BudgetExhausted)
        } else {
            None
        }
    }
}
