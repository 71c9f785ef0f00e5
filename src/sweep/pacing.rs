//! Inter-query delay.
//!
//! Adaptive pacing spreads the remaining work evenly over the time left until
//! the target duration, measured against the real sweep start. It is
//! recomputed before every query since provider latency is not part of the
//! sleep and would otherwise accumulate as drift.

use std::time::Duration;

use crate::types::PacingMode;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingInput {
    pub mode: PacingMode,
    pub target_duration_hours: f64,
    /// Floor; never undercut.
    pub min_delay_ms: u64,
    /// Ceiling for adaptive mode. Ignored when below the floor.
    pub max_delay_ms: u64,
    /// Work items in the whole sweep.
    pub total_work: u64,
    /// Work items already attempted in this sweep.
    pub completed: u64,
    /// Time since the sweep started.
    pub elapsed_ms: u64,
}

pub fn next_delay(input: &PacingInput) -> Duration {
    Duration::from_millis(next_delay_ms(input))
}

pub fn next_delay_ms(input: &PacingInput) -> u64 {
    let floor = input.min_delay_ms;
    match input.mode {
        PacingMode::Fixed => floor,
        PacingMode::Adaptive => {
            let target_ms = hours_to_ms(input.target_duration_hours);
            let remaining_work = input.total_work.saturating_sub(input.completed);
            if remaining_work == 0 || input.elapsed_ms >= target_ms {
                return floor;
            }
            let remaining_ms = target_ms - input.elapsed_ms;
            let delay = (remaining_ms as f64 / remaining_work.max(1) as f64).round() as u64;
            let ceiling = input.max_delay_ms.max(floor);
            delay.clamp(floor, ceiling)
        }
    }
}

fn hours_to_ms(hours: f64) -> u64 {
    if !hours.is_finite() || hours <= 0.0 {
        return 0;
    }
    (hours * 3_600_000.0).min(u64::MAX as f64) as u64
}
