//! Connection - lazy, idempotent handle to a transport client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::diagnostics::{BusEvent, Diagnostics, TracingDiagnostics};
use crate::error::BusError;

/// Creates transport clients. One `Connector` per backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport-specific client (SDK handle, connection pool, ...).
    type Client: Send + Sync + 'static;

    /// Open a client. Unreachable transports report `BusError::Connection`.
    async fn connect(&self) -> Result<Self::Client, BusError>;
}

/// Lazily connected transport handle.
///
/// At most one client is ever created per `Connection`. Concurrent callers of
/// [`ensure_connected`](Self::ensure_connected) wait on the first one; they
/// never race to build a second client. A failed connect leaves the
/// connection unconnected so a later call can try again. The connection
/// itself does not retry.
///
/// ## Example
///
/// ```ignore
/// let connection = Arc::new(
///     Connection::new(SqliteConnector::new(options)).with_application_id("billing"),
/// );
/// let publisher = Publisher::new(connection.clone());
/// ```
pub struct Connection<C: Connector> {
    connector: C,
    client: OnceCell<Arc<C::Client>>,
    application_id: Option<String>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<C: Connector> Connection<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            client: OnceCell::new(),
            application_id: None,
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    /// Attach an application identifier, recorded as the producer of every
    /// message and in connection logs.
    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    /// The client, if already connected.
    pub fn client(&self) -> Option<Arc<C::Client>> {
        self.client.get().cloned()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect if needed and return the shared client.
    pub async fn ensure_connected(&self) -> Result<Arc<C::Client>, BusError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                match self.connector.connect().await {
                    Ok(client) => {
                        self.diagnostics.event(&BusEvent::Connected {
                            application_id: self.application_id(),
                        });
                        Ok(Arc::new(client))
                    }
                    Err(err) => {
                        let err = match err {
                            BusError::Connection(_) => err,
                            other => BusError::Connection(other.to_string()),
                        };
                        self.diagnostics.event(&BusEvent::ConnectFailed {
                            application_id: self.application_id(),
                            error: &err,
                        });
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(client))
    }
}
