// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding pair rows and the atomic ownership change.

use chrono::{DateTime, Utc};
use ferry_core::{
    ChangeOutcome, ChatRef, FerryError, ForwardingPair, NewPair, PairId, PairStatus, SessionChange,
};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, enum_column, format_ts, map_tr_err, opt_ts_column, ts_column};

const PAIR_COLUMNS: &str = "id, name, source_chat, relay_chat, destination_chat, session, enabled, \
                            status, last_activity, message_count, created_at";

fn pair_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ForwardingPair> {
    Ok(ForwardingPair {
        id: PairId(row.get(0)?),
        name: row.get(1)?,
        source_chat: ChatRef(row.get(2)?),
        relay_chat: ChatRef(row.get(3)?),
        destination_chat: ChatRef(row.get(4)?),
        session: row.get(5)?,
        enabled: row.get(6)?,
        status: enum_column(row, 7)?,
        last_activity: opt_ts_column(row, 8)?,
        message_count: row.get(9)?,
        created_at: ts_column(row, 10)?,
    })
}

fn select_pair(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<ForwardingPair>> {
    let sql = format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE id = ?1");
    conn.query_row(&sql, params![id], pair_from_row).optional()
}

/// Insert a pair in the `unassigned` state and return the stored row.
pub async fn insert_pair(db: &Database, pair: &NewPair) -> Result<ForwardingPair, FerryError> {
    let name = pair.name.clone();
    let source = pair.source_chat.0.clone();
    let relay = pair.relay_chat.0.clone();
    let destination = pair.destination_chat.0.clone();
    let status = PairStatus::Unassigned.to_string();

    let stored = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO pairs (name, source_chat, relay_chat, destination_chat, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, source, relay, destination, status],
            )?;
            select_pair(conn, conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)?;

    stored.ok_or_else(|| FerryError::Internal("inserted pair could not be read back".into()))
}

pub async fn get_pair(db: &Database, id: PairId) -> Result<Option<ForwardingPair>, FerryError> {
    db.connection()
        .call(move |conn| select_pair(conn, id.0))
        .await
        .map_err(map_tr_err)
}

pub async fn list_pairs(db: &Database) -> Result<Vec<ForwardingPair>, FerryError> {
    db.connection()
        .call(|conn| {
            let sql = format!("SELECT {PAIR_COLUMNS} FROM pairs ORDER BY id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], pair_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_pairs_by_session(
    db: &Database,
    session: &str,
) -> Result<Vec<ForwardingPair>, FerryError> {
    let session = session.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE session = ?1 ORDER BY id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![session], pair_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Apply an ownership change in a single transaction.
///
/// Every pair's current owner is compared with the owner the caller expected.
/// With a capacity bound, the target's count after the change is checked too.
/// Any mismatch rolls the whole change back.
pub async fn set_pair_session(
    db: &Database,
    change: &SessionChange,
) -> Result<ChangeOutcome, FerryError> {
    let change = change.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            for mv in &change.moves {
                let current: Option<Option<String>> = tx
                    .query_row(
                        "SELECT session FROM pairs WHERE id = ?1",
                        params![mv.pair_id.0],
                        |row| row.get(0),
                    )
                    .optional()?;
                match current {
                    Some(owner) if owner == mv.expected_session => {}
                    _ => return Ok(ChangeOutcome::Conflict { pair_id: mv.pair_id }),
                }
            }

            if let (Some(target), Some(capacity)) = (&change.target, change.capacity) {
                let assigned: u32 = tx.query_row(
                    "SELECT COUNT(*) FROM pairs WHERE session = ?1",
                    params![target],
                    |row| row.get(0),
                )?;
                let incoming = change
                    .moves
                    .iter()
                    .filter(|mv| mv.expected_session.as_deref() != Some(target.as_str()))
                    .count() as u32;
                if assigned + incoming > capacity {
                    return Ok(ChangeOutcome::CapacityExceeded {
                        assigned: assigned + incoming,
                        capacity,
                    });
                }
            }

            for mv in &change.moves {
                match &change.target {
                    Some(target) => tx.execute(
                        "UPDATE pairs SET session = ?2, status = 'active',
                             enabled = CASE WHEN status = 'orphaned' THEN 1 ELSE enabled END
                         WHERE id = ?1",
                        params![mv.pair_id.0, target],
                    )?,
                    None => tx.execute(
                        "UPDATE pairs SET session = NULL, status = 'orphaned', enabled = 0
                         WHERE id = ?1",
                        params![mv.pair_id.0],
                    )?,
                };
            }

            tx.commit()?;
            Ok(ChangeOutcome::Applied)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn set_pair_enabled(db: &Database, id: PairId, enabled: bool) -> Result<(), FerryError> {
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE pairs SET enabled = ?2 WHERE id = ?1",
                params![id.0, enabled],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if changed == 0 {
        return Err(FerryError::NotFound {
            kind: "pair",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub async fn record_pair_activity(
    db: &Database,
    id: PairId,
    at: DateTime<Utc>,
) -> Result<(), FerryError> {
    let at = format_ts(at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE pairs SET last_activity = ?2, message_count = message_count + 1
                 WHERE id = ?1",
                params![id.0, at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
