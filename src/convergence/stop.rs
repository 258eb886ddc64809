//! Stop Decision
//! A pure function of round state. Same inputs, same answer, every time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopInputs {
    /// Current round index, zero-based
    pub round: u32,
    pub elapsed_ms: u64,
    pub max_ms: u64,
    pub max_rounds: u32,
    pub required_missing: usize,
    pub critical_missing: usize,
    pub no_new_high_yield_rounds: u32,
    pub no_new_fields_rounds: u32,
    pub no_progress_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopDecision {
    pub stop: bool,
    pub reason: String,
}

impl StopDecision {
    fn stop(reason: &str) -> Self {
        Self {
            stop: true,
            reason: reason.to_string(),
        }
    }

    fn go() -> Self {
        Self {
            stop: false,
            reason: "continue".to_string(),
        }
    }
}

pub fn uber_stop_decision(inputs: &StopInputs) -> StopDecision {
    if inputs.required_missing == 0 && inputs.critical_missing == 0 {
        return StopDecision::stop("required_and_critical_satisfied");
    }
    if inputs.elapsed_ms >= inputs.max_ms {
        return StopDecision::stop("time_budget_exhausted");
    }
    if inputs.round + 1 >= inputs.max_rounds {
        return StopDecision::stop("max_rounds_reached");
    }
    if inputs.no_new_high_yield_rounds >= inputs.no_progress_limit
        && inputs.no_new_fields_rounds >= inputs.no_progress_limit
    {
        return StopDecision::stop("diminishing_returns");
    }
    StopDecision::go()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StopInputs {
        StopInputs {
            round: 1,
            elapsed_ms: 10_000,
            max_ms: 600_000,
            max_rounds: 8,
            required_missing: 2,
            critical_missing: 1,
            no_new_high_yield_rounds: 0,
            no_new_fields_rounds: 0,
            no_progress_limit: 2,
        }
    }

    #[test]
    fn satisfied_fields_stop_first() {
        let inputs = StopInputs {
            required_missing: 0,
            critical_missing: 0,
            ..base()
        };
        let d = uber_stop_decision(&inputs);
        assert!(d.stop);
        assert_eq!(d.reason, "required_and_critical_satisfied");
    }

    #[test]
    fn time_budget_stops() {
        let inputs = StopInputs {
            elapsed_ms: 600_001,
            ..base()
        };
        assert_eq!(uber_stop_decision(&inputs).reason, "time_budget_exhausted");
    }

    #[test]
    fn round_cap_stops() {
        let inputs = StopInputs { round: 7, ..base() };
        assert_eq!(uber_stop_decision(&inputs).reason, "max_rounds_reached");
    }

    #[test]
    fn diminishing_returns_needs_both_counters() {
        let inputs = StopInputs {
            round: 3,
            no_new_high_yield_rounds: 2,
            no_new_fields_rounds: 2,
            ..base()
        };
        assert_eq!(uber_stop_decision(&inputs).reason, "diminishing_returns");

        let inputs = StopInputs {
            round: 3,
            no_new_high_yield_rounds: 2,
            no_new_fields_rounds: 1,
            ..base()
        };
        assert!(!uber_stop_decision(&inputs).stop);
    }

    #[test]
    fn same_inputs_same_answer() {
        let inputs = base();
        assert_eq!(uber_stop_decision(&inputs), uber_stop_decision(&inputs));
    }
}
