//! Diagnostics hooks - trace-context propagation and structured bus events.
//!
//! The runtime never talks to a tracing backend directly. It calls a
//! [`Diagnostics`] implementation at well-defined points:
//!
//! - `inject` before a message is sent, to write trace context into headers
//! - `extract` when a delivery arrives, to parent the dispatch span
//! - `event` for connect / publish / receive / dispatch outcomes
//!
//! [`TracingDiagnostics`] (the default) turns events into `tracing` records.

use std::fmt;

use tracing::Span;

use crate::bus::Headers;
use crate::error::BusError;

/// A structured event emitted by the runtime.
#[derive(Debug)]
pub enum BusEvent<'a> {
    Connected {
        application_id: Option<&'a str>,
    },
    ConnectFailed {
        application_id: Option<&'a str>,
        error: &'a BusError,
    },
    Published {
        message_id: &'a str,
        queue: &'a str,
        message_type: &'a str,
        attempt: u32,
    },
    PublishFailed {
        message_id: &'a str,
        queue: &'a str,
        message_type: &'a str,
        attempt: u32,
        will_retry: bool,
        error: &'a BusError,
    },
    Received {
        message_id: &'a str,
        queue: &'a str,
    },
    Dispatched {
        message_id: &'a str,
        queue: &'a str,
        message_type: &'a str,
    },
    DispatchFailed {
        message_id: &'a str,
        queue: &'a str,
        message_type: Option<&'a str>,
        error: &'a BusError,
    },
}

/// Extension point for tracing exporters and log sinks.
///
/// Every method has a no-op default so implementations only override what
/// they need.
pub trait Diagnostics: Send + Sync {
    /// Write the current trace context into outgoing headers.
    fn inject(&self, _headers: &mut Headers) {}

    /// Read trace context from incoming headers. A returned span becomes the
    /// parent of the dispatch span.
    fn extract(&self, _headers: &Headers) -> Option<Span> {
        None
    }

    /// Observe a bus event.
    fn event(&self, _event: &BusEvent<'_>) {}
}

/// Default diagnostics: logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn event(&self, event: &BusEvent<'_>) {
        match event {
            BusEvent::Connected { application_id } => {
                tracing::info!(application_id = ?application_id, "transport connected");
            }
            BusEvent::ConnectFailed {
                application_id,
                error,
            } => {
                tracing::error!(application_id = ?application_id, error = %error, "transport connect failed");
            }
            BusEvent::Published {
                message_id,
                queue,
                message_type,
                attempt,
            } => {
                tracing::debug!(message_id, queue, message_type, attempt, "message published");
            }
            BusEvent::PublishFailed {
                message_id,
                queue,
                message_type,
                attempt,
                will_retry,
                error,
            } => {
                tracing::warn!(
                    message_id,
                    queue,
                    message_type,
                    attempt,
                    will_retry,
                    error = %error,
                    "publish attempt failed"
                );
            }
            BusEvent::Received { message_id, queue } => {
                tracing::debug!(message_id, queue, "message received");
            }
            BusEvent::Dispatched {
                message_id,
                queue,
                message_type,
            } => {
                tracing::debug!(message_id, queue, message_type, "message handled");
            }
            BusEvent::DispatchFailed {
                message_id,
                queue,
                message_type,
                error,
            } => {
                tracing::warn!(
                    message_id,
                    queue,
                    message_type = ?message_type,
                    error = %error,
                    "message handling failed"
                );
            }
        }
    }
}

impl fmt::Display for BusEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BusEvent::Connected { .. } => "connected",
            BusEvent::ConnectFailed { .. } => "connect_failed",
            BusEvent::Published { .. } => "published",
            BusEvent::PublishFailed { .. } => "publish_failed",
            BusEvent::Received { .. } => "received",
            BusEvent::Dispatched { .. } => "dispatched",
            BusEvent::DispatchFailed { .. } => "dispatch_failed",
        };
        f.write_str(name)
    }
}
