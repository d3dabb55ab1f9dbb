use std::time::Duration;

use tokio::time::Instant;

/// Coalesces disk writes onto a recurring deadline.
///
///  - `Idle`: nothing pending, no deadline
///  - `Armed`: a write is pending, flush when the deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTimer {
    Idle,
    Armed { deadline: Instant },
}

impl FlushTimer {
    /// Arms the timer on the first pending write. An armed timer keeps its deadline.
    pub fn arm(&mut self, period: Duration) {
        if let FlushTimer::Idle = self {
            *self = FlushTimer::Armed {
                deadline: Instant::now() + period,
            };
        }
    }

    /// Schedules the next tick after a flush that left writes pending
    pub fn rearm(&mut self, period: Duration) {
        *self = FlushTimer::Armed {
            deadline: Instant::now() + period,
        };
    }

    pub fn disarm(&mut self) {
        *self = FlushTimer::Idle;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            FlushTimer::Idle => None,
            FlushTimer::Armed { deadline } => Some(*deadline),
        }
    }
}
