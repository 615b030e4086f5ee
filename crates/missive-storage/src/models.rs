// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row mapping between SQLite columns and the core domain types.
//!
//! JSON and enum-text columns are decoded inside the rusqlite closure, so a
//! malformed value surfaces as a `FromSqlConversionFailure` for its column.

use std::str::FromStr;

use missive_core::{Conversation, Job, PendingMessage, StoredMessage};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;

/// Columns selected by [`job_from_row`].
pub(crate) const JOB_COLUMNS: &str =
    "id, conversation_id, payload, created_at, attempts, retry_at";

/// Columns selected by [`pending_from_row`].
pub(crate) const PENDING_COLUMNS: &str =
    "message_id, job_id, conversation_id, recipients, content, sent_at, created_at";

/// Columns selected by [`message_from_row`].
pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, direction, source, sent_at, \
     received_at, read_status, read_at, send_state, expire_timer_ms, expiration_start";

/// Columns selected by [`conversation_from_row`].
pub(crate) const CONVERSATION_COLUMNS: &str = "id, kind, service_id, members, is_self, \
     blocked, unregistered_at, identity_untrusted, is_system";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Decode a JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Decode a strum-backed enum stored as text.
pub(crate) fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    let text: String = row.get(idx)?;
    T::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Encode a value for a JSON text column inside a rusqlite closure.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get::<_, String>(0)?.into(),
        conversation_id: row.get::<_, String>(1)?.into(),
        payload: json_column(row, 2)?,
        created_at: row.get(3)?,
        attempts: row.get(4)?,
        retry_at: row.get(5)?,
    })
}

pub(crate) fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingMessage> {
    Ok(PendingMessage {
        message_id: row.get::<_, String>(0)?.into(),
        job_id: row.get::<_, String>(1)?.into(),
        conversation_id: row.get::<_, String>(2)?.into(),
        recipients: json_column(row, 3)?,
        content: row.get(4)?,
        sent_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get::<_, String>(0)?.into(),
        conversation_id: row.get::<_, String>(1)?.into(),
        direction: enum_column(row, 2)?,
        source: row.get::<_, Option<String>>(3)?.map(Into::into),
        sent_at: row.get(4)?,
        received_at: row.get(5)?,
        read_status: enum_column(row, 6)?,
        read_at: row.get(7)?,
        send_state: json_column(row, 8)?,
        expire_timer_ms: row.get(9)?,
        expiration_start: row.get(10)?,
    })
}

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get::<_, String>(0)?.into(),
        kind: enum_column(row, 1)?,
        service_id: row.get::<_, Option<String>>(2)?.map(Into::into),
        members: json_column(row, 3)?,
        is_self: row.get(4)?,
        blocked: row.get(5)?,
        unregistered_at: row.get(6)?,
        identity_untrusted: row.get(7)?,
        is_system: row.get(8)?,
    })
}
