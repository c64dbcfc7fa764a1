//! Correlation middleware - carries a correlation id through every dispatch.

use async_trait::async_trait;

use super::{MessageContext, Middleware, Next};
use crate::error::BusError;

/// Header carrying a correlation id across hops.
pub const CORRELATION_HEADER: &str = "correlation-id";

/// Context item the correlation id is stored under.
pub const CORRELATION_ITEM: &str = "correlation_id";

/// Stores a correlation id in the context bag and logs around dispatch.
///
/// The id comes from the `correlation-id` header when present, otherwise the
/// message id starts a new chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationMiddleware;

#[async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<(), BusError> {
        let correlation_id = ctx
            .headers()
            .get_str(CORRELATION_HEADER)
            .unwrap_or(ctx.message_id())
            .to_string();
        ctx.set(CORRELATION_ITEM, correlation_id.clone());

        tracing::debug!(
            correlation_id = %correlation_id,
            message_type = ctx.message_type(),
            "dispatch starting"
        );
        let result = next.run(ctx).await;
        match &result {
            Ok(()) => tracing::debug!(correlation_id = %correlation_id, "dispatch finished"),
            Err(err) => tracing::debug!(correlation_id = %correlation_id, error = %err, "dispatch failed"),
        }
        result
    }
}
