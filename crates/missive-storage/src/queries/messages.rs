// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message rows: send-state bookkeeping, read tracking, and expiration.
//!
//! `expires_at` is a denormalized column kept equal to
//! `expiration_start + expire_timer_ms` so the sweep can use an index.

use std::collections::BTreeMap;

use missive_core::{
    ConversationId, MessageId, MissiveError, SendEvent, SendState, StoredMessage, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::models::{message_from_row, to_json, MESSAGE_COLUMNS};

fn select_message(conn: &Connection, id: &str) -> rusqlite::Result<Option<StoredMessage>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id],
        message_from_row,
    )
    .optional()
}

/// Insert or replace a message row.
pub async fn save_message(db: &Database, message: &StoredMessage) -> Result<(), MissiveError> {
    let message = message.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT OR REPLACE INTO messages
                 (id, conversation_id, direction, source, sent_at, received_at, read_status,
                  read_at, send_state, expire_timer_ms, expiration_start, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.direction.to_string(),
                    message.source.as_ref().map(|s| s.as_str()),
                    message.sent_at,
                    message.received_at,
                    message.read_status.to_string(),
                    message.read_at,
                    to_json(&message.send_state)?,
                    message.expire_timer_ms,
                    message.expiration_start,
                    message.expires_at(),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_message(
    db: &Database,
    id: &MessageId,
) -> Result<Option<StoredMessage>, MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<Option<StoredMessage>, rusqlite::Error> {
            select_message(conn, id.as_str())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Every message with the given sent timestamp, in either direction.
pub async fn messages_by_sent_at(
    db: &Database,
    sent_at: Timestamp,
) -> Result<Vec<StoredMessage>, MissiveError> {
    db.connection()
        .call(move |conn| -> Result<Vec<StoredMessage>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sent_at = ?1 ORDER BY received_at ASC"
            ))?;
            let rows = stmt.query_map(params![sent_at], message_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fold send-state events into a message inside one transaction.
pub async fn apply_send_events(
    db: &Database,
    id: &MessageId,
    events: &[(ConversationId, SendEvent)],
    at: Timestamp,
) -> Result<Option<StoredMessage>, MissiveError> {
    let id = id.clone();
    let events = events.to_vec();
    db.connection()
        .call(move |conn| -> Result<Option<StoredMessage>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(mut message) = select_message(&tx, id.as_str())? else {
                return Ok(None);
            };

            let before: BTreeMap<ConversationId, SendState> = message.send_state.clone();
            for (recipient, event) in events {
                let state = message
                    .send_state
                    .entry(recipient)
                    .or_insert_with(|| SendState::pending(at));
                *state = state.apply(event, at);
            }

            if message.send_state != before {
                tx.execute(
                    "UPDATE messages SET send_state = ?2 WHERE id = ?1",
                    params![id.as_str(), to_json(&message.send_state)?],
                )?;
            }
            tx.commit()?;
            Ok(Some(message))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

// Both read paths share this update; it starts the expiration timer of a
// message that has one and no start yet.
const MARK_READ_SET: &str = "read_status = 'read', read_at = ?2,
     expiration_start = CASE
         WHEN expiration_start IS NULL AND expire_timer_ms IS NOT NULL THEN ?2
         ELSE expiration_start END,
     expires_at = CASE
         WHEN expiration_start IS NULL AND expire_timer_ms IS NOT NULL THEN ?2 + expire_timer_ms
         ELSE expires_at END";

/// Mark one unread incoming message read.
pub async fn mark_read(
    db: &Database,
    id: &MessageId,
    read_at: Timestamp,
) -> Result<Option<StoredMessage>, MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<Option<StoredMessage>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                &format!(
                    "UPDATE messages SET {MARK_READ_SET}
                     WHERE id = ?1 AND read_status = 'unread' AND direction = 'incoming'"
                ),
                params![id.as_str(), read_at],
            )?;
            let updated = if changed == 0 {
                None
            } else {
                select_message(&tx, id.as_str())?
            };
            tx.commit()?;
            Ok(updated)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark all unread incoming messages of a conversation up to `sent_at` read.
pub async fn mark_read_up_to(
    db: &Database,
    conversation_id: &ConversationId,
    sent_at: Timestamp,
    read_at: Timestamp,
) -> Result<Vec<StoredMessage>, MissiveError> {
    let conversation_id = conversation_id.clone();
    db.connection()
        .call(move |conn| -> Result<Vec<StoredMessage>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE conversation_id = ?1 AND sent_at <= ?2
                       AND read_status = 'unread' AND direction = 'incoming'
                     ORDER BY sent_at ASC",
                )?;
                let rows = stmt.query_map(params![conversation_id.as_str(), sent_at], |row| {
                    row.get(0)
                })?;
                rows.collect::<Result<_, _>>()?
            };

            let mut updated = Vec::with_capacity(ids.len());
            for id in &ids {
                tx.execute(
                    &format!("UPDATE messages SET {MARK_READ_SET} WHERE id = ?1"),
                    params![id, read_at],
                )?;
                if let Some(message) = select_message(&tx, id)? {
                    updated.push(message);
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Start a message's expiration timer unless it already runs.
pub async fn start_expiration(
    db: &Database,
    id: &MessageId,
    start: Timestamp,
) -> Result<bool, MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE messages SET expiration_start = ?2, expires_at = ?2 + expire_timer_ms
                 WHERE id = ?1 AND expiration_start IS NULL AND expire_timer_ms IS NOT NULL",
                params![id.as_str(), start],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages due at or before `now`, soonest first.
pub async fn expired_messages(
    db: &Database,
    now: Timestamp,
) -> Result<Vec<StoredMessage>, MissiveError> {
    db.connection()
        .call(move |conn| -> Result<Vec<StoredMessage>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE expires_at IS NOT NULL AND expires_at <= ?1
                 ORDER BY expires_at ASC"
            ))?;
            let rows = stmt.query_map(params![now], message_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn next_expiration(db: &Database) -> Result<Option<Timestamp>, MissiveError> {
    db.connection()
        .call(|conn| -> Result<Option<Timestamp>, rusqlite::Error> {
            conn.query_row(
                "SELECT MIN(expires_at) FROM messages WHERE expires_at IS NOT NULL",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages with a timer that should have started but has no start.
///
/// Unread incoming messages are excluded: their timer starts on read.
pub async fn messages_missing_expiration_start(
    db: &Database,
) -> Result<Vec<StoredMessage>, MissiveError> {
    db.connection()
        .call(|conn| -> Result<Vec<StoredMessage>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE expire_timer_ms IS NOT NULL AND expiration_start IS NULL
                   AND (direction = 'outgoing' OR read_status = 'read')
                 ORDER BY sent_at ASC"
            ))?;
            let rows = stmt.query_map([], message_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn delete_messages(db: &Database, ids: &[MessageId]) -> Result<usize, MissiveError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM messages WHERE id = ?1")?;
                for id in &ids {
                    removed += stmt.execute(params![id.as_str()])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of messages with a running expiration timer.
pub async fn count_expiring(db: &Database) -> Result<i64, MissiveError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE expires_at IS NOT NULL",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}
