//! Record of events whose payloads could not be decoded.
//!
//! Decoding failures are permanent, so the envelope is kept here for an
//! operator instead of being redelivered. One row per event ID.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use super::{to_db_time, StoreError};
use crate::events::{DecodeError, EventEnvelope};

/// A stored undecodable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    /// Envelope ID.
    pub event_id: String,
    /// Envelope type string.
    pub event_type: String,
    /// Envelope source.
    pub source: String,
    /// Payload type the handler expected.
    pub target: String,
    /// Decoder error text.
    pub error: String,
    /// Raw JSON payload.
    pub raw_payload: String,
    /// When the row was written.
    pub created_at: String,
}

/// Dead-letter table access.
#[derive(Debug, Clone)]
pub struct DeadLetterStore {
    db: SqlitePool,
}

impl DeadLetterStore {
    /// Wrap an already migrated pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record an undecodable envelope. Returns `false` if the event ID was
    /// already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn record(
        &self,
        envelope: &EventEnvelope,
        error: &DecodeError,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO dead_letter_events \
             (event_id, event_type, source, target, error, raw_payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&envelope.id)
        .bind(&envelope.event_type)
        .bind(&envelope.source)
        .bind(error.target)
        .bind(error.source.to_string())
        .bind(&error.raw)
        .bind(to_db_time(&Utc::now()))
        .execute(&self.db)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            warn!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                target = error.target,
                "event payload dead-lettered"
            );
        }
        Ok(inserted)
    }

    /// Most recent dead letters first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn recent(&self, limit: u32) -> Result<Vec<DeadLetter>, StoreError> {
        let rows: Vec<(String, String, String, String, String, String, String)> = sqlx::query_as(
            "SELECT event_id, event_type, source, target, error, raw_payload, created_at \
             FROM dead_letter_events ORDER BY id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(event_id, event_type, source, target, error, raw_payload, created_at)| {
                    DeadLetter {
                        event_id,
                        event_type,
                        source,
                        target,
                        error,
                        raw_payload,
                        created_at,
                    }
                },
            )
            .collect())
    }
}
