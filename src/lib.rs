//! livesync - windowed live-sync core.
//!
//! Decides which subscribed clients see each room event, ephemeral signal
//! and read receipt, and lets each client pick the slice of an ordered
//! room list it currently cares about.
//!
//! - [`Dispatcher`] routes updates using the [`MembershipTracker`] as the
//!   source of truth for room membership.
//! - [`SliceRanges`] diffs and materializes client windows.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod ranges;
pub mod receiver;
pub mod replay;
pub mod telemetry;
pub mod tracker;
pub mod types;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, TrackerError};
pub use ranges::{RangeDelta, SliceRange, SliceRanges, Subslicer};
pub use receiver::{GlobalReceiver, Receiver};
pub use telemetry::SyncContext;
pub use tracker::MembershipTracker;
pub use types::{EventData, GLOBAL_SENTINEL, Membership, Receipt, RoomId, UserId};
