use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant, Sleep};

/// How long an unscheduled node sleeps between wake-ups. The driver checks
/// `is_armed` before treating a wake-up as a timeout.
const IDLE_POLL: Duration = Duration::from_secs(60);

fn pow2(exp: u64) -> u64 {
    1u64.checked_shl(exp.min(63) as u32).unwrap_or(u64::MAX)
}

/// Whole view-intervals a node waits before acting at `view`.
///
/// The due leader waits `2^(view+1) - 1` intervals; everyone else waits
/// `2^(view+2) - 2`. The leader thus gets one interval window at each power
/// of two before the rest of the set treats the slot as missed, and the
/// non-leaders back off symmetrically while waiting.
pub fn backoff_intervals(view: u64, is_due_leader: bool) -> u64 {
    if is_due_leader {
        pow2(view + 1).saturating_sub(1)
    } else {
        pow2(view + 2).saturating_sub(2)
    }
}

/// Absolute unix deadline (seconds) for acting at `view`, anchored to the
/// genesis timestamp so that independent nodes agree without a shared clock
/// service: `genesis + (total_view + backoff) * block_interval`.
pub fn deadline_unix(
    genesis_time: u64,
    total_view: u64,
    view: u64,
    is_due_leader: bool,
    block_interval_secs: u64,
) -> u64 {
    let intervals = total_view.saturating_add(backoff_intervals(view, is_due_leader));
    genesis_time.saturating_add(intervals.saturating_mul(block_interval_secs))
}

/// Holder of the node's single outstanding timer.
///
/// Scheduling always replaces whatever deadline was pending, so at most one
/// timer exists per node; cancellation is an overwrite, never a leak.
#[derive(Debug, Default)]
pub struct Pacemaker {
    deadline: Option<Instant>,
}

impl Pacemaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer `delay` from now, replacing any pending deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// A future that completes at the armed deadline, or after an idle poll
    /// interval when nothing is scheduled.
    pub fn sleep(&self) -> Sleep {
        match self.deadline {
            Some(deadline) => sleep_until(deadline),
            None => sleep(IDLE_POLL),
        }
    }
}
