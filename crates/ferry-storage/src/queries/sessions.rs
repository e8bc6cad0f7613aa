// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session rows.

use chrono::{DateTime, Utc};
use ferry_core::{FerryError, HealthState, SessionRecord};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, enum_column, format_ts, map_tr_err, opt_ts_column, ts_column};

const SESSION_COLUMNS: &str = "name, capacity, priority, health, registered_at, last_probed_at";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        name: row.get(0)?,
        capacity: row.get(1)?,
        priority: row.get(2)?,
        health: enum_column(row, 3)?,
        registered_at: ts_column(row, 4)?,
        last_probed_at: opt_ts_column(row, 5)?,
    })
}

/// Insert a new session. Fails with `AlreadyExists` when the name is taken.
pub async fn insert_session(db: &Database, session: &SessionRecord) -> Result<(), FerryError> {
    let name = session.name.clone();
    let capacity = session.capacity;
    let priority = session.priority;
    let health = session.health.to_string();
    let registered_at = format_ts(session.registered_at);
    let last_probed_at = session.last_probed_at.map(format_ts);

    let inserted = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO sessions (name, capacity, priority, health, registered_at, last_probed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![name, capacity, priority, health, registered_at, last_probed_at],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)?;

    if inserted {
        Ok(())
    } else {
        Err(FerryError::AlreadyExists {
            kind: "session",
            id: session.name.clone(),
        })
    }
}

pub async fn get_session(db: &Database, name: &str) -> Result<Option<SessionRecord>, FerryError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE name = ?1");
            conn.query_row(&sql, params![name], session_from_row)
                .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All sessions, oldest registration first.
pub async fn list_sessions(db: &Database) -> Result<Vec<SessionRecord>, FerryError> {
    db.connection()
        .call(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY rowid ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], session_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Record a health transition. `probed_at` is left unchanged when `None`.
pub async fn update_session_health(
    db: &Database,
    name: &str,
    state: HealthState,
    probed_at: Option<DateTime<Utc>>,
) -> Result<(), FerryError> {
    let key = name.to_string();
    let state = state.to_string();
    let probed_at = probed_at.map(format_ts);

    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET health = ?2, last_probed_at = COALESCE(?3, last_probed_at)
                 WHERE name = ?1",
                params![key, state, probed_at],
            )
        })
        .await
        .map_err(map_tr_err)?;

    if changed == 0 {
        return Err(FerryError::NotFound {
            kind: "session",
            id: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(name: &str, capacity: u32, priority: i32) -> SessionRecord {
        SessionRecord {
            name: name.to_string(),
            capacity,
            priority,
            health: HealthState::Unverified,
            registered_at: Utc::now(),
            last_probed_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let record = session("alpha", 3, 2);
        insert_session(&db, &record).await.unwrap();

        let loaded = get_session(&db, "alpha").await.unwrap().unwrap();
        assert_eq!(loaded.capacity, 3);
        assert_eq!(loaded.priority, 2);
        assert_eq!(loaded.health, HealthState::Unverified);
        assert!(get_session(&db, "beta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        insert_session(&db, &session("alpha", 3, 2)).await.unwrap();
        let err = insert_session(&db, &session("alpha", 9, 9)).await.unwrap_err();
        assert!(matches!(err, FerryError::AlreadyExists { kind: "session", .. }));
    }

    #[tokio::test]
    async fn list_preserves_registration_order() {
        let db = Database::open_in_memory().await.unwrap();
        for name in ["zeta", "alpha", "mu"] {
            insert_session(&db, &session(name, 1, 1)).await.unwrap();
        }
        let names: Vec<String> = list_sessions(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mu"]);
    }

    #[tokio::test]
    async fn health_update_keeps_probe_time_when_absent() {
        let db = Database::open_in_memory().await.unwrap();
        insert_session(&db, &session("alpha", 1, 1)).await.unwrap();

        let probed = Utc::now();
        update_session_health(&db, "alpha", HealthState::Healthy, Some(probed))
            .await
            .unwrap();
        update_session_health(&db, "alpha", HealthState::Degraded, None)
            .await
            .unwrap();

        let loaded = get_session(&db, "alpha").await.unwrap().unwrap();
        assert_eq!(loaded.health, HealthState::Degraded);
        assert_eq!(
            loaded.last_probed_at.map(format_ts),
            Some(format_ts(probed))
        );

        let err = update_session_health(&db, "ghost", HealthState::Healthy, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::NotFound { .. }));
    }
}
