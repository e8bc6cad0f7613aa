// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry sessions`, `status`, `register`, `reauth` and `remove`.

use ferry_core::{FerryError, HealthState};
use ferry_scheduler::{ReassignmentReport, SessionStatus};

use crate::context::Ops;
use crate::{Output, print_json};

/// Plain-text marker for a health state, as printed without colors.
fn health_tag(state: HealthState) -> &'static str {
    match state {
        HealthState::Healthy => "[OK]",
        HealthState::Degraded => "[WARN]",
        HealthState::Unverified => "[NEW]",
        HealthState::Unauthorized | HealthState::Removed => "[FAIL]",
    }
}

fn health_label(state: HealthState, color: bool) -> String {
    if !color {
        return format!("{} {state}", health_tag(state));
    }
    use colored::Colorize;
    let text = state.to_string();
    match state {
        HealthState::Healthy => format!("{} {}", "✓".green(), text.green()),
        HealthState::Degraded => format!("{} {}", "!".yellow(), text.yellow()),
        HealthState::Unverified => format!("{} {}", "?".cyan(), text.cyan()),
        HealthState::Unauthorized | HealthState::Removed => {
            format!("{} {}", "✗".red(), text.red())
        }
    }
}

/// One table row: name, health, load and priority.
fn session_row(status: &SessionStatus, color: bool) -> String {
    format!(
        "    {:<16} {:<20} {:>3}/{:<3} ({:>3.0}%)  prio {}",
        status.name,
        health_label(status.health, color),
        status.assigned,
        status.capacity,
        status.utilization_percent,
        status.priority,
    )
}

fn header(title: &str) {
    println!();
    println!("  ferry {title}");
    println!("  {}", "-".repeat(35));
}

pub async fn run_sessions(ops: &Ops, out: Output) -> Result<(), FerryError> {
    let sessions = ops.scheduler.sessions().await?;
    if out.json {
        print_json(&sessions);
        return Ok(());
    }

    header("sessions");
    if sessions.is_empty() {
        println!("    (none registered)");
        println!();
        println!("  Register one with: ferry register <name>");
    }
    for status in &sessions {
        println!("{}", session_row(status, out.color));
    }
    let unauthorized = ops.scheduler.unauthorized_sessions();
    if !unauthorized.is_empty() {
        println!();
        println!("  Needs re-authentication: {}", unauthorized.join(", "));
    }
    println!();
    Ok(())
}

pub async fn run_status(ops: &Ops, session: &str, out: Output) -> Result<(), FerryError> {
    let status = ops.scheduler.session_status(session).await?;
    if out.json {
        print_json(&status);
        return Ok(());
    }

    header("session status");
    println!("    Session:  {}", status.name);
    println!("    Health:   {}", health_label(status.health, out.color));
    println!(
        "    Load:     {}/{} ({:.0}%)",
        status.assigned, status.capacity, status.utilization_percent
    );
    println!("    Priority: {}", status.priority);
    if status.consecutive_failures > 0 {
        println!("    Failures: {}", status.consecutive_failures);
    }
    println!("    Groups:   {}", status.groups.len());
    for group in &status.groups {
        let ids: Vec<String> = group.pair_ids.iter().map(ToString::to_string).collect();
        println!("      {:<20} {}", group.to_string(), ids.join(" "));
    }
    println!();
    Ok(())
}

pub async fn run_register(
    ops: &Ops,
    name: &str,
    capacity: Option<u32>,
    priority: Option<i32>,
    out: Output,
) -> Result<(), FerryError> {
    let record = ops
        .scheduler
        .register_session(name, capacity, priority)
        .await?;
    if out.json {
        print_json(&record);
        return Ok(());
    }
    println!(
        "Registered session {} (capacity {}, priority {}). It takes pairs after its first successful probe.",
        record.name, record.capacity, record.priority
    );
    Ok(())
}

pub async fn run_reauth(ops: &Ops, session: &str, out: Output) -> Result<(), FerryError> {
    ops.scheduler.mark_reauthenticated(session).await?;
    if out.json {
        print_json(&serde_json::json!({ "session": session, "health": HealthState::Unverified }));
        return Ok(());
    }
    println!("Session {session} is unverified again and will be probed on the next cycle.");
    Ok(())
}

pub async fn run_remove(
    ops: &Ops,
    session: &str,
    force: bool,
    out: Output,
) -> Result<(), FerryError> {
    let report = ops.scheduler.delete_session(session, force).await?;
    if out.json {
        print_json(&report);
        return Ok(());
    }
    println!("Removed session {session}.");
    print_reassignment(&report);
    Ok(())
}

/// Summarize where pairs went after a session lost them.
pub(crate) fn print_reassignment(report: &ReassignmentReport) {
    for (pair_id, target) in &report.reassigned {
        println!("  pair {pair_id} -> {target}");
    }
    if !report.orphaned.is_empty() {
        let ids: Vec<String> = report.orphaned.iter().map(ToString::to_string).collect();
        println!("  orphaned: {}", ids.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::config_in;

    fn status(health: HealthState, assigned: usize, capacity: u32) -> SessionStatus {
        SessionStatus {
            name: "main".into(),
            health,
            capacity,
            priority: 2,
            assigned,
            utilization_percent: assigned as f64 * 100.0 / f64::from(capacity),
            consecutive_failures: 0,
            groups: Vec::new(),
        }
    }

    #[test]
    fn plain_row_shows_load_and_state() {
        let row = session_row(&status(HealthState::Degraded, 3, 12), false);
        assert!(row.contains("main"));
        assert!(row.contains("[WARN] degraded"));
        assert!(row.contains("3/12"));
        assert!(row.contains("25%"));
        assert!(row.contains("prio 2"));
    }

    #[test]
    fn terminal_states_share_the_fail_tag() {
        assert_eq!(health_tag(HealthState::Unauthorized), "[FAIL]");
        assert_eq!(health_tag(HealthState::Removed), "[FAIL]");
        assert_eq!(health_label(HealthState::Healthy, false), "[OK] healthy");
    }

    #[tokio::test]
    async fn idle_session_is_removed_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let ops = Ops::open(config_in(&dir)).await.unwrap();
        let plain = Output {
            json: false,
            color: false,
        };

        run_register(&ops, "main", Some(2), None, plain).await.unwrap();
        run_remove(&ops, "main", false, plain).await.unwrap();
        let err = run_status(&ops, "main", plain).await.unwrap_err();
        assert!(matches!(err, FerryError::NotFound { kind: "session", .. }));
    }

    #[tokio::test]
    async fn reauth_rejects_sessions_that_are_not_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let ops = Ops::open(config_in(&dir)).await.unwrap();
        let json = Output {
            json: true,
            color: false,
        };

        run_register(&ops, "main", None, None, json).await.unwrap();
        let err = run_reauth(&ops, "main", json).await.unwrap_err();
        assert!(matches!(err, FerryError::InvalidState(_)));
    }
}
