//! In-memory room membership index.
//!
//! The tracker is the source of truth for "who is in this room" when the
//! dispatcher computes an audience. Each room's membership lives in one
//! `DashMap` entry, so updates to the same room serialize on that entry
//! and a reload swaps the whole room at once. A user → joined rooms
//! reverse index is kept alongside.
//!
//! # Lock order
//!
//! Room entry → user index entry. Nothing acquires a room entry while
//! holding a user index entry, and filters supplied by callers run after
//! the room entry has been released.

use crate::error::TrackerError;
use crate::types::{Membership, RoomId, UserId};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct RoomMembers {
    joined: HashSet<UserId>,
    invited: HashSet<UserId>,
    /// Users that were joined or invited and no longer are. Grows with
    /// leaves; each reload keeps only the users that reload dropped.
    departed: HashSet<UserId>,
}

impl RoomMembers {
    fn membership(&self, user_id: &str) -> Membership {
        if self.joined.contains(user_id) {
            Membership::Joined
        } else if self.invited.contains(user_id) {
            Membership::Invited
        } else if self.departed.contains(user_id) {
            Membership::Left
        } else {
            Membership::NotMember
        }
    }
}

/// Joined/invited membership per room, with a reverse index.
#[derive(Debug, Default)]
pub struct MembershipTracker {
    rooms: DashMap<RoomId, RoomMembers>,
    /// Reverse index: user → rooms they are joined to.
    user_rooms: DashMap<UserId, HashSet<RoomId>>,
    started: AtomicBool,
    live: AtomicBool,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load joined members. Must run once, before any live update.
    pub fn startup(
        &self,
        room_to_joined_users: &HashMap<RoomId, Vec<UserId>>,
    ) -> Result<(), TrackerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::AlreadyStarted);
        }
        if self.live.load(Ordering::SeqCst) {
            return Err(TrackerError::LiveUpdatesBegun);
        }

        let mut total = 0usize;
        for (room_id, users) in room_to_joined_users {
            let mut room = self.rooms.entry(room_id.clone()).or_default();
            for user_id in users {
                if room.joined.insert(user_id.clone()) {
                    self.index_join(user_id, room_id);
                    total += 1;
                }
            }
        }
        info!(
            rooms = room_to_joined_users.len(),
            memberships = total,
            "Loaded joined members into tracker"
        );
        Ok(())
    }

    pub fn is_user_joined(&self, user_id: &str, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.joined.contains(user_id))
    }

    pub fn membership(&self, user_id: &str, room_id: &str) -> Membership {
        self.rooms
            .get(room_id)
            .map(|room| room.membership(user_id))
            .unwrap_or_default()
    }

    /// Mark the user as joined. Returns `true` if they were not joined
    /// immediately before, i.e. they need a full bootstrap of the room.
    pub fn user_joined_room(&self, user_id: &str, room_id: &str) -> bool {
        self.mark_live();
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        self.join_locked(&mut room, user_id, room_id)
    }

    /// Bulk join. Returns `true` if any of the users was newly joined.
    pub fn users_joined_room(&self, user_ids: &[UserId], room_id: &str) -> bool {
        self.mark_live();
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        let mut any_new = false;
        for user_id in user_ids {
            any_new |= self.join_locked(&mut room, user_id, room_id);
        }
        any_new
    }

    /// Remove the user from the joined and invited sets. Idempotent.
    pub fn user_left_room(&self, user_id: &str, room_id: &str) {
        self.mark_live();
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let was_joined = room.joined.remove(user_id);
        let was_invited = room.invited.remove(user_id);
        if was_joined || was_invited {
            room.departed.insert(user_id.to_string());
        }
        if was_joined {
            self.index_leave(user_id, room_id);
        }
    }

    /// Record pending invites. Already-joined users stay joined.
    pub fn users_invited_to_room(&self, user_ids: &[UserId], room_id: &str) {
        self.mark_live();
        if user_ids.is_empty() {
            return;
        }
        let mut room = self.rooms.entry(room_id.to_string()).or_default();
        for user_id in user_ids {
            if room.joined.contains(user_id) {
                debug!(user = %user_id, room = %room_id, "ignoring invite for joined user");
                continue;
            }
            room.departed.remove(user_id);
            room.invited.insert(user_id.clone());
        }
    }

    pub fn num_invited_users_for_room(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.invited.len())
            .unwrap_or(0)
    }

    pub fn num_joined_users_for_room(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.joined.len())
            .unwrap_or(0)
    }

    pub fn invited_users_for_room(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|room| room.invited.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Joined users accepted by `filter`, plus the true joined count.
    ///
    /// The count always reflects every joined user, regardless of the filter.
    pub fn joined_users_for_room<F>(&self, room_id: &str, mut filter: F) -> (Vec<UserId>, usize)
    where
        F: FnMut(&str) -> bool,
    {
        let joined: Vec<UserId> = match self.rooms.get(room_id) {
            Some(room) => room.joined.iter().cloned().collect(),
            None => return (Vec::new(), 0),
        };
        let join_count = joined.len();
        let users = joined
            .into_iter()
            .filter(|user_id| filter(user_id.as_str()))
            .collect();
        (users, join_count)
    }

    pub fn joined_rooms_for_user(&self, user_id: &str) -> Vec<RoomId> {
        self.user_rooms
            .get(user_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replace everything known about a room with an authoritative snapshot.
    ///
    /// Readers of the room see either the old or the new membership, never
    /// a mix. Users dropped by the snapshot become [`Membership::Left`].
    pub fn reload_memberships_for_room(
        &self,
        room_id: &str,
        joined: &[UserId],
        invited: &[UserId],
    ) {
        self.mark_live();
        let mut room = self.rooms.entry(room_id.to_string()).or_default();

        let new_joined: HashSet<UserId> = joined.iter().cloned().collect();
        let new_invited: HashSet<UserId> = invited
            .iter()
            .filter(|user_id| !new_joined.contains(*user_id))
            .cloned()
            .collect();

        for user_id in room.joined.difference(&new_joined) {
            self.index_leave(user_id, room_id);
        }
        for user_id in new_joined.difference(&room.joined) {
            self.index_join(user_id, room_id);
        }

        let departed: HashSet<UserId> = room
            .joined
            .iter()
            .chain(room.invited.iter())
            .filter(|user_id| !new_joined.contains(*user_id) && !new_invited.contains(*user_id))
            .cloned()
            .collect();

        debug!(
            room = %room_id,
            joined = new_joined.len(),
            invited = new_invited.len(),
            departed = departed.len(),
            "Reloaded room memberships"
        );
        *room = RoomMembers {
            joined: new_joined,
            invited: new_invited,
            departed,
        };
    }

    fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    fn join_locked(&self, room: &mut RoomMembers, user_id: &str, room_id: &str) -> bool {
        room.invited.remove(user_id);
        room.departed.remove(user_id);
        let newly_joined = room.joined.insert(user_id.to_string());
        if newly_joined {
            self.index_join(user_id, room_id);
        }
        newly_joined
    }

    fn index_join(&self, user_id: &str, room_id: &str) {
        self.user_rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
    }

    fn index_leave(&self, user_id: &str, room_id: &str) {
        let now_empty = match self.user_rooms.get_mut(user_id) {
            Some(mut rooms) => {
                rooms.remove(room_id);
                rooms.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.user_rooms.remove_if(user_id, |_, rooms| rooms.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn startup_loads_joined_members() {
        let tracker = MembershipTracker::new();
        let snapshot = HashMap::from([
            ("!a".to_string(), users(&["@alice", "@bob"])),
            ("!b".to_string(), users(&["@alice"])),
        ]);
        tracker.startup(&snapshot).expect("startup");

        assert!(tracker.is_user_joined("@alice", "!a"));
        assert!(tracker.is_user_joined("@bob", "!a"));
        assert!(!tracker.is_user_joined("@bob", "!b"));
        assert_eq!(tracker.num_joined_users_for_room("!a"), 2);

        let mut rooms = tracker.joined_rooms_for_user("@alice");
        rooms.sort();
        assert_eq!(rooms, vec!["!a".to_string(), "!b".to_string()]);
    }

    #[test]
    fn startup_twice_is_rejected() {
        let tracker = MembershipTracker::new();
        tracker.startup(&HashMap::new()).expect("first startup");
        assert_eq!(
            tracker.startup(&HashMap::new()),
            Err(TrackerError::AlreadyStarted)
        );
    }

    #[test]
    fn startup_after_live_updates_is_rejected() {
        let tracker = MembershipTracker::new();
        tracker.user_joined_room("@alice", "!a");
        assert_eq!(
            tracker.startup(&HashMap::new()),
            Err(TrackerError::LiveUpdatesBegun)
        );
        assert_eq!(tracker.num_joined_users_for_room("!a"), 1);
    }

    #[test]
    fn join_reports_first_join_only() {
        let tracker = MembershipTracker::new();
        assert!(tracker.user_joined_room("@alice", "!a"));
        assert!(!tracker.user_joined_room("@alice", "!a"));
        tracker.user_left_room("@alice", "!a");
        assert!(tracker.user_joined_room("@alice", "!a"));
    }

    #[test]
    fn bulk_join_reports_any_new() {
        let tracker = MembershipTracker::new();
        tracker.user_joined_room("@alice", "!a");
        assert!(!tracker.users_joined_room(&users(&["@alice"]), "!a"));
        assert!(tracker.users_joined_room(&users(&["@alice", "@bob"]), "!a"));
        assert_eq!(tracker.num_joined_users_for_room("!a"), 2);
    }

    #[test]
    fn leave_is_idempotent() {
        let tracker = MembershipTracker::new();
        tracker.users_joined_room(&users(&["@alice", "@bob"]), "!a");
        tracker.user_left_room("@alice", "!a");
        let once = (
            tracker.membership("@alice", "!a"),
            tracker.num_joined_users_for_room("!a"),
            tracker.joined_rooms_for_user("@alice"),
        );
        tracker.user_left_room("@alice", "!a");
        let twice = (
            tracker.membership("@alice", "!a"),
            tracker.num_joined_users_for_room("!a"),
            tracker.joined_rooms_for_user("@alice"),
        );
        assert_eq!(once, twice);
        assert_eq!(once.0, Membership::Left);
        assert_eq!(once.1, 1);
    }

    #[test]
    fn leave_unknown_room_is_noop() {
        let tracker = MembershipTracker::new();
        tracker.user_left_room("@alice", "!nowhere");
        assert_eq!(tracker.membership("@alice", "!nowhere"), Membership::NotMember);
    }

    #[test]
    fn invite_then_join_moves_between_states() {
        let tracker = MembershipTracker::new();
        tracker.users_invited_to_room(&users(&["@bob", "@carol"]), "!a");
        assert_eq!(tracker.num_invited_users_for_room("!a"), 2);
        assert_eq!(tracker.membership("@bob", "!a"), Membership::Invited);
        let mut invited = tracker.invited_users_for_room("!a");
        invited.sort();
        assert_eq!(invited, users(&["@bob", "@carol"]));

        assert!(tracker.user_joined_room("@bob", "!a"));
        assert_eq!(tracker.num_invited_users_for_room("!a"), 1);
        assert_eq!(tracker.membership("@bob", "!a"), Membership::Joined);
        assert_eq!(tracker.invited_users_for_room("!a"), users(&["@carol"]));

        // rejecting an invite
        tracker.user_left_room("@carol", "!a");
        assert_eq!(tracker.num_invited_users_for_room("!a"), 0);
        assert_eq!(tracker.membership("@carol", "!a"), Membership::Left);
        assert!(tracker.invited_users_for_room("!a").is_empty());
        assert!(tracker.invited_users_for_room("!missing").is_empty());
    }

    #[test]
    fn invite_of_joined_user_is_ignored() {
        let tracker = MembershipTracker::new();
        tracker.user_joined_room("@alice", "!a");
        tracker.users_invited_to_room(&users(&["@alice"]), "!a");
        assert_eq!(tracker.membership("@alice", "!a"), Membership::Joined);
        assert_eq!(tracker.num_invited_users_for_room("!a"), 0);
    }

    #[test]
    fn filtered_audience_keeps_true_join_count() {
        let tracker = MembershipTracker::new();
        tracker.users_joined_room(&users(&["@alice", "@bob", "@carol"]), "!a");
        let (audience, count) = tracker.joined_users_for_room("!a", |u| u == "@bob");
        assert_eq!(audience, users(&["@bob"]));
        assert_eq!(count, 3);

        let (audience, count) = tracker.joined_users_for_room("!missing", |_| true);
        assert!(audience.is_empty());
        assert_eq!(count, 0);
    }

    #[test]
    fn reload_replaces_room_membership() {
        let tracker = MembershipTracker::new();
        tracker.users_joined_room(&users(&["@alice", "@bob"]), "!a");
        tracker.users_invited_to_room(&users(&["@carol"]), "!a");

        tracker.reload_memberships_for_room("!a", &users(&["@bob", "@dave"]), &users(&["@erin"]));

        assert_eq!(tracker.membership("@alice", "!a"), Membership::Left);
        assert_eq!(tracker.membership("@bob", "!a"), Membership::Joined);
        assert_eq!(tracker.membership("@carol", "!a"), Membership::Left);
        assert_eq!(tracker.membership("@dave", "!a"), Membership::Joined);
        assert_eq!(tracker.membership("@erin", "!a"), Membership::Invited);
        assert_eq!(tracker.num_joined_users_for_room("!a"), 2);
        assert_eq!(tracker.num_invited_users_for_room("!a"), 1);
        assert!(tracker.joined_rooms_for_user("@alice").is_empty());
        assert_eq!(tracker.joined_rooms_for_user("@dave"), vec!["!a".to_string()]);
    }

    #[test]
    fn reload_prefers_join_over_invite() {
        let tracker = MembershipTracker::new();
        tracker.reload_memberships_for_room("!a", &users(&["@bob"]), &users(&["@bob"]));
        assert_eq!(tracker.membership("@bob", "!a"), Membership::Joined);
        assert_eq!(tracker.num_invited_users_for_room("!a"), 0);
    }

    #[test]
    fn reload_forgets_earlier_departures() {
        let tracker = MembershipTracker::new();
        tracker.users_joined_room(&users(&["@alice", "@bob", "@carol"]), "!a");
        tracker.user_left_room("@alice", "!a");
        assert_eq!(tracker.membership("@alice", "!a"), Membership::Left);

        tracker.reload_memberships_for_room("!a", &users(&["@carol"]), &[]);

        // only users dropped by this reload are remembered as departed
        assert_eq!(tracker.membership("@alice", "!a"), Membership::NotMember);
        assert_eq!(tracker.membership("@bob", "!a"), Membership::Left);
        assert_eq!(tracker.membership("@carol", "!a"), Membership::Joined);
    }
}
