mod message;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Message)]
// ============================================================================

/// Derive macro that implements `conveyor::Message`.
///
/// The wire-level type name written into the `$type` discriminator defaults
/// to the type's module path plus its name. Override it with
/// `#[message(name = "...")]` to keep the wire name stable across renames
/// and moves.
///
/// # Usage
///
/// ```ignore
/// use conveyor::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(name = "orders.created")]
/// pub struct OrderCreated {
///     pub order_id: String,
/// }
///
/// // Type name: "my_app::events::OrderShipped"
/// #[derive(Serialize, Deserialize, Message)]
/// pub struct OrderShipped {
///     pub order_id: String,
/// }
/// ```
#[proc_macro_derive(Message, attributes(message))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    message::derive_message(input)
}
