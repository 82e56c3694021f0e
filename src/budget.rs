//! Wall-clock and transition budgets of a run.

use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::format_duration;

#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    max_duration: Duration,
    max_transitions: u64,
    transitions: u64,
}

impl Budget {
    pub fn new(max_duration: Duration, max_transitions: u64) -> Self {
        Self::started_at(Instant::now(), max_duration, max_transitions)
    }

    pub fn started_at(started: Instant, max_duration: Duration, max_transitions: u64) -> Self {
        Self {
            started,
            max_duration,
            max_transitions,
            transitions: 0,
        }
    }

    pub fn record_transition(&mut self) {
        self.transitions += 1;
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `HH:MM:SS` since the budget started
    pub fn time_consumption(&self) -> String {
        format_duration(self.elapsed())
    }

    /// Failure reason once a limit is exceeded; time is checked first
    pub fn exhausted(&self) -> Option<String> {
        let elapsed = self.elapsed();
        if elapsed > self.max_duration {
            error!(elapsed = %format_duration(elapsed), "max explore time reached");
            return Some(format!("Max explore time reached: {}", format_duration(elapsed)));
        }
        if self.transitions >= self.max_transitions {
            error!(transitions = self.transitions, "max transitions reached");
            return Some(format!("Max explore transitions reached: {}", self.transitions));
        }
        info!(
            elapsed = %format_duration(elapsed),
            transitions = self.transitions,
            max_transitions = self.max_transitions,
            "budget"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_budget() {
        let mut budget = Budget::new(Duration::from_secs(3600), 2);
        assert!(budget.exhausted().is_none());
        budget.record_transition();
        assert!(budget.exhausted().is_none());
        budget.record_transition();
        assert_eq!(
            budget.exhausted().unwrap(),
            "Max explore transitions reached: 2"
        );
    }

    #[test]
    fn test_time_budget_checked_first() {
        let started = Instant::now()
            .checked_sub(Duration::from_secs(3 * 60 + 5))
            .unwrap();
        let mut budget = Budget::started_at(started, Duration::from_secs(60), 1);
        budget.record_transition();
        let reason = budget.exhausted().unwrap();
        assert!(reason.starts_with("Max explore time reached: 00:03:0"), "{}", reason);
    }
}
