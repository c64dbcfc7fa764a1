//! `Events` table schema and its idempotent migration.

use sqlx::SqlitePool;

use crate::error::BusError;

const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS Events (
    EventSerial  INTEGER PRIMARY KEY AUTOINCREMENT,
    EventState   INTEGER NOT NULL DEFAULT 0,
    EventId      TEXT    NOT NULL UNIQUE,
    QueueName    TEXT    NOT NULL,
    EventData    TEXT    NOT NULL,
    ClientName   TEXT    NULL,
    CreatedAt    TEXT    NOT NULL,
    EventHeaders TEXT    NULL
)
"#;

const CREATE_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS IX_Events_Queue_State
    ON Events (QueueName, EventState, EventSerial)
"#;

const HAS_HEADERS_COLUMN: &str =
    "SELECT COUNT(*) FROM pragma_table_info('Events') WHERE name = 'EventHeaders'";

const ADD_HEADERS_COLUMN: &str = "ALTER TABLE Events ADD COLUMN EventHeaders TEXT NULL";

/// Create the table and index if missing, and add the headers column to
/// tables created before it existed. Safe to run on every start.
pub(crate) async fn initialize(pool: &SqlitePool) -> Result<(), BusError> {
    sqlx::query(CREATE_EVENTS).execute(pool).await?;
    sqlx::query(CREATE_CLAIM_INDEX).execute(pool).await?;

    let has_headers: i64 = sqlx::query_scalar(HAS_HEADERS_COLUMN)
        .fetch_one(pool)
        .await?;
    if has_headers == 0 {
        match sqlx::query(ADD_HEADERS_COLUMN).execute(pool).await {
            Ok(_) => tracing::info!("added EventHeaders column to Events"),
            // Another process migrated between the check and the ALTER.
            Err(sqlx::Error::Database(db)) if db.message().contains("duplicate column") => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
