// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session health state machine.
//!
//! ```text
//! Unverified --ok--> Healthy --fail--> Degraded --ok--> Healthy
//!     |                                   |
//!     +--permanent / threshold--> Unauthorized <--permanent / threshold--+
//! ```
//!
//! `Unauthorized` and `Removed` never change through probing.

use ferry_core::{HealthState, ProbeOutcome};

/// State and failure streak after applying one probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: HealthState,
    pub consecutive_failures: u32,
}

/// Apply a probe outcome to a session's current state.
///
/// `threshold` is the number of consecutive failed probes after which a
/// degraded (or never verified) session is declared unauthorized.
pub fn transition(
    current: HealthState,
    consecutive_failures: u32,
    outcome: &ProbeOutcome,
    threshold: u32,
) -> Transition {
    if current.is_terminal() {
        return Transition {
            state: current,
            consecutive_failures,
        };
    }

    let failures = consecutive_failures.saturating_add(1);
    let state = match (current, outcome) {
        (_, ProbeOutcome::Ok) => {
            return Transition {
                state: HealthState::Healthy,
                consecutive_failures: 0,
            };
        }
        (HealthState::Unverified, ProbeOutcome::PermanentFailure { .. }) => HealthState::Unauthorized,
        (HealthState::Healthy, _) => HealthState::Degraded,
        (HealthState::Degraded, ProbeOutcome::PermanentFailure { .. }) => HealthState::Unauthorized,
        (_, ProbeOutcome::Error { .. }) if failures >= threshold => HealthState::Unauthorized,
        (state, _) => state,
    };

    Transition {
        state,
        consecutive_failures: failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> ProbeOutcome {
        ProbeOutcome::Error {
            reason: "timeout".into(),
        }
    }

    fn permanent() -> ProbeOutcome {
        ProbeOutcome::PermanentFailure {
            reason: "auth key revoked".into(),
        }
    }

    #[test]
    fn successful_probe_verifies_and_resets_streak() {
        let t = transition(HealthState::Unverified, 2, &ProbeOutcome::Ok, 5);
        assert_eq!(t.state, HealthState::Healthy);
        assert_eq!(t.consecutive_failures, 0);

        let t = transition(HealthState::Degraded, 3, &ProbeOutcome::Ok, 5);
        assert_eq!(t.state, HealthState::Healthy);
    }

    #[test]
    fn first_failure_degrades_a_healthy_session() {
        assert_eq!(
            transition(HealthState::Healthy, 0, &transient(), 5).state,
            HealthState::Degraded
        );
        assert_eq!(
            transition(HealthState::Healthy, 0, &permanent(), 5).state,
            HealthState::Degraded
        );
    }

    #[test]
    fn permanent_failure_is_confirmed_while_degraded() {
        assert_eq!(
            transition(HealthState::Degraded, 1, &permanent(), 5).state,
            HealthState::Unauthorized
        );
        assert_eq!(
            transition(HealthState::Unverified, 0, &permanent(), 5).state,
            HealthState::Unauthorized
        );
    }

    #[test]
    fn five_failures_walk_healthy_to_unauthorized() {
        let mut state = HealthState::Healthy;
        let mut failures = 0;
        let mut seen = Vec::new();
        for _ in 0..5 {
            let t = transition(state, failures, &transient(), 5);
            state = t.state;
            failures = t.consecutive_failures;
            seen.push(state);
        }
        assert_eq!(
            seen,
            [
                HealthState::Degraded,
                HealthState::Degraded,
                HealthState::Degraded,
                HealthState::Degraded,
                HealthState::Unauthorized,
            ]
        );
    }

    #[test]
    fn unverified_session_gives_up_at_threshold() {
        let t = transition(HealthState::Unverified, 1, &transient(), 3);
        assert_eq!(t.state, HealthState::Unverified);
        let t = transition(HealthState::Unverified, 2, &transient(), 3);
        assert_eq!(t.state, HealthState::Unauthorized);
    }

    #[test]
    fn terminal_states_ignore_probes() {
        for state in [HealthState::Unauthorized, HealthState::Removed] {
            let t = transition(state, 7, &ProbeOutcome::Ok, 5);
            assert_eq!(t.state, state);
            assert_eq!(t.consecutive_failures, 7);
        }
    }
}
