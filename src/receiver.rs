//! Callback surfaces driven by the dispatcher.
//!
//! Per-user receivers implement [`Receiver`]. The global slot requires
//! [`GlobalReceiver`], which adds room invalidation.

use crate::telemetry::SyncContext;
use crate::types::{EventData, Receipt};
use serde_json::Value;

/// Callbacks a [`crate::Dispatcher`] may fire.
///
/// Callbacks run on the dispatching thread and must not block on I/O.
pub trait Receiver: Send + Sync {
    fn on_new_event(&self, ctx: &SyncContext, event: &EventData);

    fn on_receipt(&self, ctx: &SyncContext, receipt: &Receipt);

    /// Typing and similar ephemeral signals. The payload is opaque here.
    fn on_ephemeral_event(&self, ctx: &SyncContext, room_id: &str, event: &Value);

    /// Called once, right after registration, while the registry write lock
    /// is held. Must not call back into the dispatcher.
    fn on_registered(&self, ctx: &SyncContext) -> anyhow::Result<()>;

    /// Room invalidation found this user has left `room_id`.
    fn on_left_room(&self, _ctx: &SyncContext, _room_id: &str, _leave_event: &Value) {}

    /// Room invalidation found this user is invited to `room_id`.
    fn on_invite(&self, _ctx: &SyncContext, _room_id: &str, _invite_state: &[Value]) {}
}

/// Receiver for shared caches that see every room.
pub trait GlobalReceiver: Receiver {
    /// Drop everything cached about `room_id`; it will be re-derived.
    fn on_invalidate_room(&self, ctx: &SyncContext, room_id: &str);
}
