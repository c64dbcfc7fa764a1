//! `#[derive(Message)]` naming.

use conveyor::{BusError, EnvelopeCodec, Message, TypeRegistry};
use std::sync::Arc;

use crate::support::{Heartbeat, MyEvent, OrderCreated};

#[test]
fn explicit_name_is_used() {
    assert_eq!(OrderCreated::type_name(), "orders.created");
}

#[test]
fn default_name_is_module_path() {
    assert_eq!(MyEvent::type_name(), "bus::support::MyEvent");
}

#[test]
fn envelope_round_trip_through_registry() {
    let registry = TypeRegistry::new()
        .register::<MyEvent>()
        .register::<OrderCreated>();
    let codec = EnvelopeCodec::new(Arc::new(registry));

    let body = codec
        .encode(&OrderCreated {
            order_id: "o-1".into(),
            note: None,
        })
        .unwrap();
    assert_eq!(body, r#"{"$type":"orders.created","order_id":"o-1"}"#);

    let decoded = codec.decode(&body).unwrap();
    assert_eq!(
        decoded.downcast_ref::<OrderCreated>(),
        Some(&OrderCreated {
            order_id: "o-1".into(),
            note: None
        })
    );
}

#[test]
fn unit_message_round_trips() {
    let registry = TypeRegistry::new()
        .register::<MyEvent>()
        .register::<Heartbeat>();
    let codec = EnvelopeCodec::new(Arc::new(registry));

    let body = codec.encode(&Heartbeat).unwrap();
    assert_eq!(body, r#"{"$type":"heartbeat"}"#);

    let decoded = codec.decode(&body).unwrap();
    assert_eq!(decoded.downcast_ref::<Heartbeat>(), Some(&Heartbeat));
}

#[test]
fn fieldless_envelope_still_rejects_structs_with_required_fields() {
    let codec = EnvelopeCodec::new(Arc::new(TypeRegistry::new().register::<OrderCreated>()));

    let err = codec.decode(r#"{"$type":"orders.created"}"#).unwrap_err();
    assert!(matches!(err, BusError::Serialization(_)), "{err:?}");
}
