//! Event payload builders.

use serde_json::{Value, json};

/// An `m.room.member` state event for `target` with the given membership.
#[allow(dead_code)]
pub fn member_event(event_id: &str, sender: &str, target: &str, membership: &str) -> Value {
    json!({
        "type": "m.room.member",
        "event_id": event_id,
        "sender": sender,
        "state_key": target,
        "origin_server_ts": 1_700_000_000_000u64,
        "content": {"membership": membership},
    })
}

/// An `m.room.message` timeline event.
#[allow(dead_code)]
pub fn message_event(event_id: &str, sender: &str, body: &str) -> Value {
    json!({
        "type": "m.room.message",
        "event_id": event_id,
        "sender": sender,
        "origin_server_ts": 1_700_000_000_000u64,
        "content": {"msgtype": "m.text", "body": body},
    })
}
