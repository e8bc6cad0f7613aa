// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlation records keyed by (pair, source message).

use chrono::{DateTime, Utc};
use ferry_core::{CorrelationRecord, FerryError, Hop, InsertOutcome, MessageId, PairId};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, format_ts, map_tr_err, opt_ts_column, ts_column};

const CORRELATION_COLUMNS: &str =
    "pair_id, source_message_id, relay_message_id, destination_message_id, created_at, deleted_at";

fn correlation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorrelationRecord> {
    Ok(CorrelationRecord {
        pair_id: PairId(row.get(0)?),
        source_message_id: MessageId(row.get(1)?),
        relay_message_id: row.get::<_, Option<String>>(2)?.map(MessageId),
        destination_message_id: row.get::<_, Option<String>>(3)?.map(MessageId),
        created_at: ts_column(row, 4)?,
        deleted_at: opt_ts_column(row, 5)?,
    })
}

fn select_correlation(
    conn: &rusqlite::Connection,
    pair_id: i64,
    source: &str,
) -> rusqlite::Result<Option<CorrelationRecord>> {
    let sql = format!(
        "SELECT {CORRELATION_COLUMNS} FROM correlations WHERE pair_id = ?1 AND source_message_id = ?2"
    );
    conn.query_row(&sql, params![pair_id, source], correlation_from_row)
        .optional()
}

pub async fn get_correlation(
    db: &Database,
    pair_id: PairId,
    source: &MessageId,
) -> Result<Option<CorrelationRecord>, FerryError> {
    let source = source.0.clone();
    db.connection()
        .call(move |conn| select_correlation(conn, pair_id.0, &source))
        .await
        .map_err(map_tr_err)
}

/// Insert a record unless one exists for the same key.
///
/// The pair must exist at insertion time. Later pair deletion leaves the
/// record in place.
pub async fn insert_correlation(
    db: &Database,
    record: &CorrelationRecord,
) -> Result<InsertOutcome, FerryError> {
    let pair_id = record.pair_id;
    let source = record.source_message_id.0.clone();
    let relay = record.relay_message_id.as_ref().map(|id| id.0.clone());
    let destination = record.destination_message_id.as_ref().map(|id| id.0.clone());
    let created_at = format_ts(record.created_at);

    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let pair_exists = tx
                .query_row("SELECT 1 FROM pairs WHERE id = ?1", params![pair_id.0], |_| Ok(()))
                .optional()?
                .is_some();
            if !pair_exists {
                return Ok(None);
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO correlations
                    (pair_id, source_message_id, relay_message_id, destination_message_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![pair_id.0, source, relay, destination, created_at],
            )?;
            let outcome = if inserted == 1 {
                InsertOutcome::Inserted
            } else {
                match select_correlation(&tx, pair_id.0, &source)? {
                    Some(existing) => InsertOutcome::Existing(existing),
                    None => return Err(rusqlite::Error::QueryReturnedNoRows),
                }
            };
            tx.commit()?;
            Ok(Some(outcome))
        })
        .await
        .map_err(map_tr_err)?;

    outcome.ok_or_else(|| FerryError::NotFound {
        kind: "pair",
        id: pair_id.to_string(),
    })
}

/// Fill in the destination id of a record that is not deleted.
pub async fn set_destination_id(
    db: &Database,
    pair_id: PairId,
    source: &MessageId,
    destination: &MessageId,
) -> Result<(), FerryError> {
    let key = source.0.clone();
    let destination = destination.0.clone();
    let found = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE correlations SET destination_message_id = ?3
                 WHERE pair_id = ?1 AND source_message_id = ?2 AND deleted_at IS NULL",
                params![pair_id.0, key, destination],
            )?;
            if changed == 1 {
                return Ok(true);
            }
            Ok(select_correlation(conn, pair_id.0, &key)?.is_some())
        })
        .await
        .map_err(map_tr_err)?;

    if !found {
        return Err(FerryError::NotFound {
            kind: "correlation",
            id: format!("{pair_id}/{source}"),
        });
    }
    Ok(())
}

/// Null one hop id. Once both are null the record is stamped deleted.
/// Clearing an already-null hop is a no-op.
pub async fn clear_hop(
    db: &Database,
    pair_id: PairId,
    source: &MessageId,
    hop: Hop,
) -> Result<(), FerryError> {
    let source = source.0.clone();
    let now = format_ts(Utc::now());
    let column = match hop {
        Hop::Relay => "relay_message_id",
        Hop::Destination => "destination_message_id",
    };

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "UPDATE correlations SET {column} = NULL
                     WHERE pair_id = ?1 AND source_message_id = ?2"
                ),
                params![pair_id.0, source],
            )?;
            tx.execute(
                "UPDATE correlations SET deleted_at = ?3
                 WHERE pair_id = ?1 AND source_message_id = ?2 AND deleted_at IS NULL
                   AND relay_message_id IS NULL AND destination_message_id IS NULL",
                params![pair_id.0, source, now],
            )?;
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete records created before `older_than`.
pub async fn purge_correlations(
    db: &Database,
    older_than: DateTime<Utc>,
) -> Result<u64, FerryError> {
    let cutoff = format_ts(older_than);
    let removed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM correlations WHERE created_at < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(removed as u64)
}
