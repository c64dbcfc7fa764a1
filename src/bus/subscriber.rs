//! Subscriber trait for push-style consumption.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::Delivery;
use crate::error::BusError;

/// Callback a push transport invokes for every delivery.
///
/// `Ok` means the message was handled and may be acknowledged; `Err` lets
/// the transport abandon or dead-letter it.
pub type DeliveryCallback =
    Arc<dyn Fn(Delivery) -> BoxFuture<'static, Result<(), BusError>> + Send + Sync>;

/// Trait for transports that deliver messages by calling back into the
/// consumer (broker SDKs with their own receive loop).
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Register `callback` for `queue` and start the transport's receive loop.
    async fn start(&self, queue: &str, callback: DeliveryCallback) -> Result<(), BusError>;

    /// Stop the receive loop for `queue`. Waits for an in-flight callback.
    async fn stop(&self, queue: &str) -> Result<(), BusError>;
}
