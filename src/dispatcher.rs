//! Routes room events, ephemeral signals and receipts to subscribers.
//!
//! The dispatcher keeps the membership tracker up to date from the member
//! events flowing through it, asks the tracker who is joined, and invokes
//! the global receiver followed by every joined user that currently has a
//! receiver installed.
//!
//! # Thread Safety
//!
//! The registry sits behind a `parking_lot::RwLock`. Dispatches take the
//! read lock only long enough to clone the receivers they need and invoke
//! them after releasing it. `register` keeps the write lock while the
//! receiver's registration hook runs, so hooks must not call back into the
//! dispatcher. Same-room ordering relies on each room being fed by one
//! upstream sequence.

use crate::error::DispatchError;
use crate::metrics;
use crate::receiver::{GlobalReceiver, Receiver};
use crate::telemetry::{SyncContext, spans};
use crate::tracker::MembershipTracker;
use crate::types::{EventData, GLOBAL_SENTINEL, MembershipChange, Receipt, RoomId, UserId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Default)]
struct Registry {
    global: Option<Arc<dyn GlobalReceiver>>,
    users: HashMap<UserId, Arc<dyn Receiver>>,
}

/// Subject of a member event being dispatched.
struct MembershipTarget {
    user_id: UserId,
    change: MembershipChange,
    /// The change gave the user a fresh join.
    force_initial: bool,
}

/// Dispatches live updates to per-user and global receivers.
#[derive(Default)]
pub struct Dispatcher {
    tracker: MembershipTracker,
    registry: RwLock<Registry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &MembershipTracker {
        &self.tracker
    }

    pub fn is_user_joined(&self, user_id: &str, room_id: &str) -> bool {
        self.tracker.is_user_joined(user_id, room_id)
    }

    /// Load joined members. Must be called before any poller starts feeding
    /// events.
    pub fn startup(
        &self,
        room_to_joined_users: &HashMap<RoomId, Vec<UserId>>,
    ) -> Result<(), DispatchError> {
        self.tracker
            .startup(room_to_joined_users)
            .map_err(|e| record_error(e.into()))
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Install `receiver` for `user_id`, replacing any previous one, then run
    /// its registration hook. A failing hook leaves the receiver installed.
    pub fn register(
        &self,
        ctx: &SyncContext,
        user_id: &str,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), DispatchError> {
        if user_id == GLOBAL_SENTINEL {
            return Err(record_error(DispatchError::ReservedUserId(
                user_id.to_string(),
            )));
        }
        let mut registry = self.registry.write();
        if registry
            .users
            .insert(user_id.to_string(), Arc::clone(&receiver))
            .is_some()
        {
            warn!(user = %user_id, "Dispatcher.register: receiver already registered");
        }
        metrics::set_registered_receivers(registry.users.len());
        receiver
            .on_registered(ctx)
            .map_err(|e| record_error(e.into()))
    }

    /// Install the global receiver. Same mechanics as [`Self::register`].
    pub fn register_global(
        &self,
        ctx: &SyncContext,
        receiver: Arc<dyn GlobalReceiver>,
    ) -> Result<(), DispatchError> {
        let mut registry = self.registry.write();
        if registry.global.replace(Arc::clone(&receiver)).is_some() {
            warn!("Dispatcher.register_global: global receiver already registered");
        }
        receiver
            .on_registered(ctx)
            .map_err(|e| record_error(e.into()))
    }

    pub fn unregister(&self, user_id: &str) {
        let mut registry = self.registry.write();
        registry.users.remove(user_id);
        metrics::set_registered_receivers(registry.users.len());
    }

    pub fn unregister_global(&self) {
        self.registry.write().global = None;
    }

    pub fn receiver_for_user(&self, user_id: &str) -> Option<Arc<dyn Receiver>> {
        self.registry.read().users.get(user_id).cloned()
    }

    pub fn global_receiver(&self) -> Option<Arc<dyn GlobalReceiver>> {
        self.registry.read().global.clone()
    }

    // ========================================================================
    // Event paths
    // ========================================================================

    /// Bulk path for the initial state block of a room a poller has just
    /// started tracking.
    ///
    /// If the tracker already knows joined users for the room the block is
    /// replayed through [`Self::on_new_event`] instead.
    pub fn on_new_initial_room_state(&self, ctx: &SyncContext, room_id: &str, state: Vec<Value>) {
        let span = spans::dispatch(ctx.span(), "initial_state", room_id);
        let _guard = span.enter();

        let existing = self.tracker.num_joined_users_for_room(room_id);
        if existing > 0 {
            warn!(
                join_count = existing,
                room = %room_id,
                num_state = state.len(),
                "OnNewInitialRoomState but have entries in tracker already, degrading to live events"
            );
            for event in state {
                self.on_new_event(ctx, room_id, event, 0);
            }
            return;
        }

        let mut events = Vec::with_capacity(state.len());
        let mut joined = Vec::new();
        let mut invited = Vec::new();
        for event in state {
            let ed = EventData::new(event, room_id, 0);
            if let Some((target, membership)) = ed.membership_target() {
                match MembershipChange::parse(membership) {
                    MembershipChange::Invite => invited.push(target.to_string()),
                    MembershipChange::Join => joined.push(target.to_string()),
                    _ => {}
                }
            }
            events.push(ed);
        }

        let force_initial = self.tracker.users_joined_room(&joined, room_id);
        self.tracker.users_invited_to_room(&invited, room_id);
        let invite_count = self.tracker.num_invited_users_for_room(room_id);
        let (audience, join_count) = self.audience(room_id);
        debug!(
            room = %room_id,
            joined = joined.len(),
            invited = invited.len(),
            force_initial,
            "bulk loaded initial room state"
        );

        for mut ed in events {
            ed.invite_count = invite_count;
            ed.join_count = join_count;
            let recipients = self.notify_listeners(ctx, &ed, &audience, None);
            metrics::record_dispatch("initial_state", recipients);
        }
    }

    /// Steady-state path for one timeline or state event.
    pub fn on_new_event(&self, ctx: &SyncContext, room_id: &str, event: Value, seq: i64) {
        let span = spans::dispatch(ctx.span(), "event", room_id);
        let _guard = span.enter();

        let mut ed = EventData::new(event, room_id, seq);

        let target = ed
            .membership_target()
            .map(|(user_id, membership)| (user_id.to_string(), MembershipChange::parse(membership)))
            .map(|(user_id, change)| {
                let mut force_initial = false;
                match change {
                    // only tracked so invite counts stay correct
                    MembershipChange::Invite => {
                        self.tracker
                            .users_invited_to_room(std::slice::from_ref(&user_id), room_id);
                    }
                    MembershipChange::Join => {
                        force_initial = self.tracker.user_joined_room(&user_id, room_id);
                    }
                    MembershipChange::Leave | MembershipChange::Ban => {
                        self.tracker.user_left_room(&user_id, room_id);
                    }
                    MembershipChange::Other => {}
                }
                MembershipTarget {
                    user_id,
                    change,
                    force_initial,
                }
            });

        ed.invite_count = self.tracker.num_invited_users_for_room(room_id);
        let (audience, join_count) = self.audience(room_id);
        ed.join_count = join_count;

        let recipients = self.notify_listeners(ctx, &ed, &audience, target.as_ref());
        metrics::record_dispatch("event", recipients);
    }

    pub fn on_ephemeral_event(&self, ctx: &SyncContext, room_id: &str, event: &Value) {
        let span = spans::dispatch(ctx.span(), "ephemeral", room_id);
        let _guard = span.enter();

        let (audience, _) = self.audience(room_id);
        let (global, receivers) = self.snapshot(audience.iter().map(String::as_str));

        // global first so shared caches update before per-user state
        if let Some(global) = global {
            global.on_ephemeral_event(ctx, room_id, event);
        }
        for (_, receiver) in &receivers {
            receiver.on_ephemeral_event(ctx, room_id, event);
        }
        metrics::record_dispatch("ephemeral", receivers.len());
    }

    pub fn on_receipt(&self, ctx: &SyncContext, receipt: &Receipt) {
        let span = spans::dispatch(ctx.span(), "receipt", &receipt.room_id);
        let _guard = span.enter();

        let (audience, _) = self.audience(&receipt.room_id);
        let (global, receivers) = self.snapshot(audience.iter().map(String::as_str));

        if let Some(global) = global {
            global.on_receipt(ctx, receipt);
        }
        for (_, receiver) in &receivers {
            receiver.on_receipt(ctx, receipt);
        }
        metrics::record_dispatch("receipt", receivers.len());
    }

    /// Resync a room whose state changed out of band (state reset, redaction).
    ///
    /// The global receiver is invalidated first; without one the call is
    /// aborted before any membership is touched. Users absent from all three
    /// maps are not notified.
    pub fn on_invalidate_room(
        &self,
        ctx: &SyncContext,
        room_id: &str,
        joins: &HashMap<UserId, EventData>,
        invites: &HashMap<UserId, Vec<Value>>,
        leaves: &HashMap<UserId, Value>,
    ) -> Result<(), DispatchError> {
        let span = spans::dispatch(ctx.span(), "invalidate", room_id);
        let _guard = span.enter();

        let Some(global) = self.global_receiver() else {
            error!(room = %room_id, "No receiver for global cache, cannot invalidate room");
            return Err(record_error(DispatchError::NoGlobalReceiver));
        };
        global.on_invalidate_room(ctx, room_id);

        let joined: Vec<UserId> = joins.keys().cloned().collect();
        let invited: Vec<UserId> = invites.keys().cloned().collect();
        self.tracker
            .reload_memberships_for_room(room_id, &joined, &invited);

        let affected = leaves
            .keys()
            .chain(invites.keys())
            .chain(joins.keys())
            .map(String::as_str);
        let (_, receivers) = self.snapshot(affected);
        let receivers: HashMap<&str, Arc<dyn Receiver>> = receivers.into_iter().collect();

        let mut notified = 0usize;
        for (user_id, leave_event) in leaves {
            if let Some(receiver) = receivers.get(user_id.as_str()) {
                receiver.on_left_room(ctx, room_id, leave_event);
                notified += 1;
            }
        }
        for (user_id, invite_state) in invites {
            if let Some(receiver) = receivers.get(user_id.as_str()) {
                receiver.on_invite(ctx, room_id, invite_state);
                notified += 1;
            }
        }
        for (user_id, join_data) in joins {
            if let Some(receiver) = receivers.get(user_id.as_str()) {
                receiver.on_new_event(ctx, join_data);
                notified += 1;
            }
        }
        debug!(
            room = %room_id,
            joins = joins.len(),
            invites = invites.len(),
            leaves = leaves.len(),
            notified,
            "invalidated room"
        );
        metrics::record_dispatch("invalidate", notified);
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Joined users with a receiver installed, plus the true join count.
    fn audience(&self, room_id: &str) -> (Vec<UserId>, usize) {
        let registry = self.registry.read();
        self.tracker.joined_users_for_room(room_id, |user_id| {
            // the global receiver is notified separately
            user_id != GLOBAL_SENTINEL && registry.users.contains_key(user_id)
        })
    }

    /// Clone the global receiver and the receivers of `users` that have one.
    #[allow(clippy::type_complexity)]
    fn snapshot<'a>(
        &self,
        users: impl Iterator<Item = &'a str>,
    ) -> (
        Option<Arc<dyn GlobalReceiver>>,
        Vec<(&'a str, Arc<dyn Receiver>)>,
    ) {
        let registry = self.registry.read();
        let receivers = users
            .filter_map(|user_id| {
                registry
                    .users
                    .get(user_id)
                    .map(|receiver| (user_id, Arc::clone(receiver)))
            })
            .collect();
        (registry.global.clone(), receivers)
    }

    /// Deliver `ed` to the global receiver, then a copy to every audience
    /// member, then to the membership target if it was not in the audience.
    /// Returns the number of per-user receivers invoked.
    fn notify_listeners(
        &self,
        ctx: &SyncContext,
        ed: &EventData,
        audience: &[UserId],
        target: Option<&MembershipTarget>,
    ) -> usize {
        debug!(
            room = %ed.room_id,
            users = audience.len(),
            seq = ed.seq,
            join_count = ed.join_count,
            "notify"
        );

        let (global, receivers, target_receiver) = {
            let registry = self.registry.read();
            let receivers: Vec<(&str, Arc<dyn Receiver>)> = audience
                .iter()
                .filter_map(|user_id| {
                    registry
                        .users
                        .get(user_id)
                        .map(|receiver| (user_id.as_str(), Arc::clone(receiver)))
                })
                .collect();
            let target_receiver = target.and_then(|t| registry.users.get(&t.user_id).cloned());
            (registry.global.clone(), receivers, target_receiver)
        };

        if let Some(global) = global {
            global.on_new_event(ctx, ed);
        }

        let mut notified_target = false;
        for (user_id, receiver) in &receivers {
            let mut copy = ed.clone();
            if let Some(target) = target
                && target.user_id == *user_id
            {
                notified_target = true;
                copy.force_initial = target.force_initial;
            }
            receiver.on_new_event(ctx, &copy);
        }
        let mut recipients = receivers.len();

        // invites and leaves where the target is not (or no longer) joined.
        // Invitees get their invite through the dedicated invite path with
        // stripped state, never as a live event.
        if let Some(target) = target
            && !notified_target
            && target.change != MembershipChange::Invite
            && let Some(receiver) = target_receiver
        {
            let mut copy = ed.clone();
            copy.force_initial = target.force_initial;
            receiver.on_new_event(ctx, &copy);
            recipients += 1;
        }
        recipients
    }
}

/// Count `err` under its error code and hand it back.
fn record_error(err: DispatchError) -> DispatchError {
    metrics::record_error(err.error_code());
    err
}
