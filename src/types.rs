//! Shared data model: identifiers, membership states and per-dispatch
//! event data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Fully qualified user id (e.g. `@alice:example.org`).
pub type UserId = String;

/// Room id (e.g. `!abc:example.org`).
pub type RoomId = String;

/// Reserved registry key for the global receiver. Never part of an audience.
pub const GLOBAL_SENTINEL: &str = "-";

/// Event type of membership state events.
pub const MEMBER_EVENT_TYPE: &str = "m.room.member";

/// Membership of one user in one room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Membership {
    #[default]
    NotMember,
    Invited,
    Joined,
    /// Previously joined or invited, now gone (leave, ban, reload).
    Left,
}

/// Membership value carried in `content.membership` of a member event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Invite,
    Join,
    Leave,
    Ban,
    /// Anything else (`knock`, unknown values). Does not touch the tracker.
    Other,
}

impl MembershipChange {
    pub fn parse(value: &str) -> Self {
        match value {
            "invite" => Self::Invite,
            "join" => Self::Join,
            "leave" => Self::Leave,
            "ban" => Self::Ban,
            _ => Self::Other,
        }
    }
}

fn str_field(event: &Value, name: &str) -> String {
    event
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// A parsed event plus the room counters captured at dispatch time.
///
/// Created once per dispatch and cloned per recipient; the payload and
/// content are shared so the clones stay cheap. Receivers must copy out
/// anything they want to keep past the callback.
#[derive(Debug, Clone)]
pub struct EventData {
    pub event: Arc<Value>,
    pub room_id: RoomId,
    pub event_type: String,
    pub state_key: Option<String>,
    pub content: Arc<Value>,
    pub sender: UserId,
    pub event_id: String,
    pub timestamp: u64,
    /// Stream position, monotonically increasing across the gateway.
    /// Zero for events that came from an initial state block.
    pub seq: i64,
    pub join_count: usize,
    pub invite_count: usize,
    /// The recipient must treat this room as a fresh bootstrap.
    pub force_initial: bool,
}

impl EventData {
    /// Extract the routing fields of `event`.
    ///
    /// Each field is read on its own; a missing or ill-typed field falls
    /// back to its default without affecting the others.
    pub fn new(event: Value, room_id: &str, seq: i64) -> Self {
        let content = event.get("content").cloned().unwrap_or_default();
        Self {
            room_id: room_id.to_string(),
            event_type: str_field(&event, "type"),
            state_key: event
                .get("state_key")
                .and_then(Value::as_str)
                .map(str::to_string),
            content: Arc::new(content),
            sender: str_field(&event, "sender"),
            event_id: str_field(&event, "event_id"),
            timestamp: event
                .get("origin_server_ts")
                .and_then(Value::as_u64)
                .unwrap_or_default(),
            event: Arc::new(event),
            seq,
            join_count: 0,
            invite_count: 0,
            force_initial: false,
        }
    }

    /// Look up a top-level content field by name.
    pub fn content_field(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// `content.membership` of an `m.room.member` state event.
    pub fn membership(&self) -> Option<&str> {
        if self.event_type != MEMBER_EVENT_TYPE || !self.is_state() {
            return None;
        }
        Some(
            self.content_field("membership")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        )
    }

    /// Target user and membership value when this is a member state event.
    pub fn membership_target(&self) -> Option<(&str, &str)> {
        let membership = self.membership()?;
        Some((self.state_key.as_deref()?, membership))
    }
}

/// A read receipt. Only `room_id` matters for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub room_id: RoomId,
    pub event_id: String,
    pub user_id: UserId,
    #[serde(rename = "type", default = "default_receipt_type")]
    pub receipt_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub ts: u64,
}

fn default_receipt_type() -> String {
    "m.read".to_string()
}
