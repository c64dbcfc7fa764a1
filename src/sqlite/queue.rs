use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{schema, SqliteQueueOptions};
use crate::bus::{Delivery, Headers, Listener, OutgoingMessage, Sender};
use crate::error::BusError;

const INSERT_EVENT: &str = r#"
INSERT INTO Events (EventState, EventId, QueueName, EventData, ClientName, CreatedAt, EventHeaders)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const CLAIM_EVENTS: &str = r#"
UPDATE Events
   SET EventState = 1
 WHERE EventState = 0
   AND EventSerial IN (
        SELECT EventSerial
          FROM Events
         WHERE QueueName = ? AND EventState = 0
         ORDER BY EventSerial ASC
         LIMIT ?
   )
RETURNING EventSerial, EventState, EventId, QueueName, EventData, ClientName, CreatedAt, EventHeaders
"#;

const SELECT_EVENT: &str = r#"
SELECT EventSerial, EventState, EventId, QueueName, EventData, ClientName, CreatedAt, EventHeaders
  FROM Events
 WHERE EventId = ?
"#;

const COUNT_IN_STATE: &str = "SELECT COUNT(*) FROM Events WHERE QueueName = ? AND EventState = ?";

const DELETE_EVENT: &str = "DELETE FROM Events WHERE EventId = ?";

const REVERT_CLAIM: &str = "UPDATE Events SET EventState = 0 WHERE EventId = ? AND EventState = 1";

/// Row state in the `Events` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum EventState {
    Pending = 0,
    Claimed = 1,
}

impl TryFrom<i64> for EventState {
    type Error = BusError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventState::Pending),
            1 => Ok(EventState::Claimed),
            other => Err(BusError::permanent(format!("unknown EventState {}", other))),
        }
    }
}

/// One row of the `Events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub serial: i64,
    pub state: EventState,
    pub id: String,
    pub queue: String,
    pub payload: String,
    pub producer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub headers: Headers,
}

impl QueueRow {
    fn from_row(row: &SqliteRow) -> Result<Self, BusError> {
        let serial: i64 = row.try_get("EventSerial")?;
        let id: String = row.try_get("EventId")?;
        let column: Option<String> = row.try_get("EventHeaders")?;
        // Rows written by other producers may carry headers in another shape.
        let headers = decode_headers(column.as_deref()).unwrap_or_else(|err| {
            tracing::warn!(
                serial,
                message_id = %id,
                error = %err,
                "ignoring undecodable event headers"
            );
            Headers::new()
        });
        Ok(Self {
            serial,
            state: EventState::try_from(row.try_get::<i64, _>("EventState")?)?,
            id,
            queue: row.try_get("QueueName")?,
            payload: row.try_get("EventData")?,
            producer: row.try_get("ClientName")?,
            created_at: row.try_get("CreatedAt")?,
            headers,
        })
    }

    fn into_delivery(self) -> Delivery {
        Delivery {
            id: self.id,
            queue: self.queue,
            body: self.payload,
            headers: self.headers,
            serial: Some(self.serial),
            producer: self.producer,
            enqueued_at: Some(self.created_at),
        }
    }
}

/// Headers are stored as a JSON object of base64 values; no headers is NULL.
fn encode_headers(headers: &Headers) -> Result<Option<String>, BusError> {
    if headers.is_empty() {
        return Ok(None);
    }
    let encoded: BTreeMap<&str, String> = headers
        .iter()
        .map(|(key, value)| (key, STANDARD.encode(value)))
        .collect();
    Ok(Some(serde_json::to_string(&encoded)?))
}

fn decode_headers(column: Option<&str>) -> Result<Headers, BusError> {
    let Some(column) = column else {
        return Ok(Headers::new());
    };
    let encoded: BTreeMap<String, String> = serde_json::from_str(column)?;
    encoded
        .into_iter()
        .map(|(key, value)| {
            STANDARD
                .decode(value)
                .map(|bytes| (key, bytes))
                .map_err(|e| BusError::Serialization(format!("invalid header value: {}", e)))
        })
        .collect()
}

/// Durable queue over a SQLite connection pool.
///
/// Implements [`Sender`] and [`Listener`]. Cheap to clone; clones share the
/// pool.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    delete_processed: bool,
}

impl SqliteQueue {
    /// Open the pool and make sure the schema exists.
    pub async fn open(options: SqliteQueueOptions) -> Result<Self, BusError> {
        let connect_options = SqliteConnectOptions::from_str(&options.url)
            .map_err(|e| {
                BusError::Configuration(format!("invalid sqlite url '{}': {}", options.url, e))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect_options)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        Self::with_pool(pool, options.delete_processed).await
    }

    /// Use an existing pool. Initializes the schema.
    pub async fn with_pool(pool: SqlitePool, delete_processed: bool) -> Result<Self, BusError> {
        schema::initialize(&pool).await?;
        tracing::debug!(delete_processed, "sqlite queue ready");
        Ok(Self {
            pool,
            delete_processed,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn deletes_processed(&self) -> bool {
        self.delete_processed
    }

    /// Insert a `Pending` row.
    ///
    /// Re-sending an id that already exists is accepted without inserting a
    /// second row, so retries with a fixed message id are idempotent.
    pub async fn insert(&self, queue: &str, message: &OutgoingMessage) -> Result<(), BusError> {
        let result = sqlx::query(INSERT_EVENT)
            .bind(EventState::Pending as i64)
            .bind(&message.id)
            .bind(queue)
            .bind(&message.body)
            .bind(message.producer.as_deref())
            .bind(Utc::now())
            .bind(encode_headers(&message.headers)?)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::debug!(message_id = %message.id, queue, "event already stored");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically claim up to `max` pending rows of `queue`, oldest first.
    ///
    /// Concurrent claimers never receive the same row.
    pub async fn claim(&self, queue: &str, max: usize) -> Result<Vec<QueueRow>, BusError> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows = sqlx::query(CLAIM_EVENTS)
            .bind(queue)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        // The claim is already committed; a row that cannot be read stays
        // Claimed and the rest of the batch is still delivered.
        let mut claimed: Vec<QueueRow> = rows
            .iter()
            .filter_map(|row| match QueueRow::from_row(row) {
                Ok(row) => Some(row),
                Err(err) => {
                    let serial = row.try_get::<i64, _>("EventSerial").ok();
                    tracing::error!(
                        queue,
                        serial = ?serial,
                        error = %err,
                        "skipping unreadable claimed event"
                    );
                    None
                }
            })
            .collect();
        // RETURNING order is unspecified.
        claimed.sort_by_key(|row| row.serial);

        if !claimed.is_empty() {
            tracing::debug!(queue, claimed = claimed.len(), "claimed events");
        }
        Ok(claimed)
    }

    /// Look up a row by event id.
    pub async fn find(&self, event_id: &str) -> Result<Option<QueueRow>, BusError> {
        let row = sqlx::query(SELECT_EVENT)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(QueueRow::from_row).transpose()
    }

    pub async fn pending_count(&self, queue: &str) -> Result<u64, BusError> {
        self.count(queue, EventState::Pending).await
    }

    pub async fn claimed_count(&self, queue: &str) -> Result<u64, BusError> {
        self.count(queue, EventState::Claimed).await
    }

    /// Move a `Claimed` row back to `Pending`. Returns `false` when no
    /// claimed row has that id.
    pub async fn requeue(&self, event_id: &str) -> Result<bool, BusError> {
        let result = sqlx::query(REVERT_CLAIM)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        let requeued = result.rows_affected() == 1;
        if requeued {
            tracing::info!(message_id = event_id, "event requeued");
        }
        Ok(requeued)
    }

    /// Delete a row. Returns `false` when it did not exist.
    pub async fn delete(&self, event_id: &str) -> Result<bool, BusError> {
        let result = sqlx::query(DELETE_EVENT)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count(&self, queue: &str, state: EventState) -> Result<u64, BusError> {
        let count: i64 = sqlx::query_scalar(COUNT_IN_STATE)
            .bind(queue)
            .bind(state as i64)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Sender for SqliteQueue {
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<(), BusError> {
        self.insert(queue, &message).await
    }
}

#[async_trait]
impl Listener for SqliteQueue {
    async fn receive(&self, queue: &str, max: usize) -> Result<Vec<Delivery>, BusError> {
        let rows = self.claim(queue, max).await?;
        Ok(rows.into_iter().map(QueueRow::into_delivery).collect())
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError> {
        if self.delete_processed {
            self.delete(&delivery.id).await?;
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        // Failed rows stay Claimed; an operator decides whether to requeue.
        tracing::warn!(
            message_id = %delivery.id,
            queue = %delivery.queue,
            reason,
            "event left claimed after failure"
        );
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.requeue(&delivery.id).await.map(|_| ())
    }
}
