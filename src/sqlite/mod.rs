//! SQLite-backed durable queue.
//!
//! Every queue shares one `Events` table. A row is inserted `Pending` on
//! send and flipped to `Claimed` by exactly one consumer through a single
//! `UPDATE ... RETURNING` statement, which is the only point of mutual
//! exclusion between competing processors:
//!
//! ```text
//!   send ──► Pending ──claim──► Claimed ──complete──► (kept, or deleted)
//!               ▲                  │
//!               └──release/requeue─┘
//! ```
//!
//! Rows are never moved back to `Pending` automatically. A processor that
//! dies after claiming leaves its rows `Claimed` until an operator calls
//! [`SqliteQueue::requeue`].
//!
//! ## Example
//!
//! ```ignore
//! let connection = Arc::new(Connection::new(SqliteConnector::new(
//!     SqliteQueueOptions::new("sqlite://conveyor.db").with_delete_processed(true),
//! )));
//! let publisher = Publisher::new(connection.clone());
//! let processor = PollingProcessor::new(connection, "q1", message_processor);
//! ```

mod queue;
mod schema;

use std::time::Duration;

use async_trait::async_trait;

use crate::bus::Connector;
use crate::error::BusError;

pub use queue::{EventState, QueueRow, SqliteQueue};

/// Connection and behaviour options for [`SqliteQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteQueueOptions {
    /// `sqlite://path/to/file.db`. The file is created when missing.
    pub url: String,
    pub max_connections: u32,
    /// Delete rows once they were handled successfully instead of leaving
    /// them `Claimed`.
    pub delete_processed: bool,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for SqliteQueueOptions {
    fn default() -> Self {
        Self {
            url: "sqlite://conveyor.db".to_string(),
            max_connections: 5,
            delete_processed: false,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteQueueOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_delete_processed(mut self, delete: bool) -> Self {
        self.delete_processed = delete;
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Opens a [`SqliteQueue`] on first use.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteQueueOptions,
}

impl SqliteConnector {
    pub fn new(options: SqliteQueueOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SqliteQueueOptions {
        &self.options
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Client = SqliteQueue;

    async fn connect(&self) -> Result<SqliteQueue, BusError> {
        SqliteQueue::open(self.options.clone()).await
    }
}
