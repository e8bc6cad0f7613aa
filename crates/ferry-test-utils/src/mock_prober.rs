// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health prober that replays scripted outcomes per session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use ferry_core::{FerryError, HealthProber, ProbeOutcome};

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<ProbeOutcome>>,
    fallback: HashMap<String, ProbeOutcome>,
    hanging: HashSet<String>,
    calls: Vec<String>,
}

/// A prober whose answers are set up by the test.
///
/// Queued outcomes are returned first; once a session's queue is empty the
/// session's fallback (default [`ProbeOutcome::Ok`]) is returned.
#[derive(Default)]
pub struct ScriptedProber {
    script: Mutex<Script>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue outcomes for the next probes of `session`.
    pub fn push(&self, session: &str, outcomes: impl IntoIterator<Item = ProbeOutcome>) {
        self.script()
            .queued
            .entry(session.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Outcome returned once the queue for `session` is exhausted.
    pub fn set_fallback(&self, session: &str, outcome: ProbeOutcome) {
        self.script().fallback.insert(session.to_string(), outcome);
    }

    /// Make probes of `session` never return.
    pub fn hang(&self, session: &str) {
        self.script().hanging.insert(session.to_string());
    }

    /// Sessions probed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    /// Shorthand for a transient probe error.
    pub fn transient(reason: &str) -> ProbeOutcome {
        ProbeOutcome::Error {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, session: &str) -> Result<ProbeOutcome, FerryError> {
        let (outcome, hang) = {
            let mut script = self.script();
            script.calls.push(session.to_string());
            let queued = script
                .queued
                .get_mut(session)
                .and_then(VecDeque::pop_front);
            let outcome = queued
                .or_else(|| script.fallback.get(session).cloned())
                .unwrap_or(ProbeOutcome::Ok);
            (outcome, script.hanging.contains(session))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_outcomes_come_before_fallback() {
        let prober = ScriptedProber::new();
        prober.push("s1", [ScriptedProber::transient("timeout")]);
        prober.set_fallback(
            "s1",
            ProbeOutcome::PermanentFailure {
                reason: "revoked".into(),
            },
        );

        assert!(matches!(
            prober.probe("s1").await.unwrap(),
            ProbeOutcome::Error { .. }
        ));
        assert!(matches!(
            prober.probe("s1").await.unwrap(),
            ProbeOutcome::PermanentFailure { .. }
        ));
        assert_eq!(prober.probe("s2").await.unwrap(), ProbeOutcome::Ok);
        assert_eq!(prober.calls(), ["s1", "s1", "s2"]);
    }
}
