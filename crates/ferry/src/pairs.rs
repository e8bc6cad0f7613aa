// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry pairs`, `add-pair`, `assign` and `reassign`.

use ferry_core::{ChatRef, CredentialStore, FerryError, ForwardingPair, NewPair, PairId, PairStatus};
use serde::Serialize;

use crate::context::Ops;
use crate::{Output, print_json};

/// Result of a bulk move for `--json` mode.
#[derive(Debug, Serialize)]
struct ReassignResponse {
    target: String,
    moved: usize,
}

fn status_label(pair: &ForwardingPair, color: bool) -> String {
    let text = if pair.enabled {
        pair.status.to_string()
    } else {
        format!("{} (disabled)", pair.status)
    };
    if !color {
        return text;
    }
    use colored::Colorize;
    match (pair.status, pair.enabled) {
        (PairStatus::Active, true) => text.green().to_string(),
        (PairStatus::Orphaned, _) => text.red().to_string(),
        _ => text.yellow().to_string(),
    }
}

fn pair_row(pair: &ForwardingPair, color: bool) -> String {
    let last = pair
        .last_activity
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "    #{:<4} {:<16} {} -> {} -> {}  [{}]  session {}  msgs {}  last {}",
        pair.id.0,
        pair.name,
        pair.source_chat,
        pair.relay_chat,
        pair.destination_chat,
        status_label(pair, color),
        pair.session.as_deref().unwrap_or("-"),
        pair.message_count,
        last,
    )
}

pub async fn run_pairs(ops: &Ops, orphaned: bool, out: Output) -> Result<(), FerryError> {
    let pairs = if orphaned {
        ops.scheduler.orphaned_pairs().await?
    } else {
        ops.store.list_pairs().await?
    };
    if out.json {
        print_json(&pairs);
        return Ok(());
    }

    println!();
    println!("  ferry pairs");
    println!("  {}", "-".repeat(35));
    if pairs.is_empty() {
        println!("    (none)");
    }
    for pair in &pairs {
        println!("{}", pair_row(pair, out.color));
    }
    if !orphaned {
        let waiting = pairs
            .iter()
            .filter(|p| p.status == PairStatus::Orphaned)
            .count();
        if waiting > 0 {
            println!();
            println!("  {waiting} orphaned; move them with: ferry reassign <session> <ids>");
        }
    }
    println!();
    Ok(())
}

pub async fn run_add_pair(
    ops: &Ops,
    name: &str,
    source: &str,
    relay: &str,
    destination: &str,
    out: Output,
) -> Result<(), FerryError> {
    let pair = ops
        .store
        .insert_pair(&NewPair {
            name: name.to_string(),
            source_chat: ChatRef::from(source),
            relay_chat: ChatRef::from(relay),
            destination_chat: ChatRef::from(destination),
        })
        .await?;
    if out.json {
        print_json(&pair);
        return Ok(());
    }
    println!(
        "Created pair #{} ({}). Assign it with: ferry assign {}",
        pair.id, pair.name, pair.id
    );
    Ok(())
}

pub async fn run_assign(ops: &Ops, pair_id: i64, out: Output) -> Result<(), FerryError> {
    let session = ops.scheduler.assign_pair(PairId(pair_id)).await?;
    if out.json {
        print_json(&serde_json::json!({ "pair_id": pair_id, "session": session }));
        return Ok(());
    }
    println!("Pair #{pair_id} assigned to {session}.");
    Ok(())
}

pub async fn run_reassign(
    ops: &Ops,
    target: &str,
    pair_ids: &[i64],
    out: Output,
) -> Result<(), FerryError> {
    let ids: Vec<PairId> = pair_ids.iter().copied().map(PairId).collect();
    let moved = ops.scheduler.bulk_reassign(&ids, target).await?;
    if out.json {
        print_json(&ReassignResponse {
            target: target.to_string(),
            moved,
        });
        return Ok(());
    }
    println!("Moved {moved} pair(s) to {target}.");
    Ok(())
}
