// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation directory queries.

use missive_core::{Conversation, ConversationId, MissiveError, ServiceId, Timestamp};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::models::{conversation_from_row, to_json, CONVERSATION_COLUMNS};

pub async fn save_conversation(
    db: &Database,
    conversation: &Conversation,
) -> Result<(), MissiveError> {
    let c = conversation.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT OR REPLACE INTO conversations
                 (id, kind, service_id, members, is_self, blocked, unregistered_at,
                  identity_untrusted, is_system)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    c.id.as_str(),
                    c.kind.to_string(),
                    c.service_id.as_ref().map(|s| s.as_str()),
                    to_json(&c.members)?,
                    c.is_self,
                    c.blocked,
                    c.unregistered_at,
                    c.identity_untrusted,
                    c.is_system,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_conversation(
    db: &Database,
    id: &ConversationId,
) -> Result<Option<Conversation>, MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.as_str()],
                conversation_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Load several conversations, preserving the order of `ids`.
pub async fn get_conversations(
    db: &Database,
    ids: &[ConversationId],
) -> Result<Vec<Conversation>, MissiveError> {
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| -> Result<Vec<Conversation>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
            ))?;
            let mut found = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(c) = stmt
                    .query_row(params![id.as_str()], conversation_from_row)
                    .optional()?
                {
                    found.push(c);
                }
            }
            Ok(found)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn find_by_service_id(
    db: &Database,
    service_id: &ServiceId,
) -> Result<Option<Conversation>, MissiveError> {
    let service_id = service_id.clone();
    db.connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE service_id = ?1"
                ),
                params![service_id.as_str()],
                conversation_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record that a contact is no longer registered. Keeps the first timestamp.
pub async fn mark_unregistered(
    db: &Database,
    id: &ConversationId,
    at: Timestamp,
) -> Result<(), MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE conversations SET unregistered_at = COALESCE(unregistered_at, ?2)
                 WHERE id = ?1",
                params![id.as_str(), at],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn set_identity_trusted(
    db: &Database,
    id: &ConversationId,
    trusted: bool,
) -> Result<(), MissiveError> {
    let id = id.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE conversations SET identity_untrusted = ?2 WHERE id = ?1",
                params![id.as_str(), !trusted],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn count_conversations(db: &Database) -> Result<i64, MissiveError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
        })
        .await
        .map_err(crate::database::map_tr_err)
}
