//! Unified error handling for livesync.
//!
//! Contract violations are returned as typed errors instead of being
//! tolerated silently. Missing receivers are not errors except for the
//! one case where an operation cannot proceed without one (room
//! invalidation without a global receiver).

use thiserror::Error;

// ============================================================================
// Tracker Errors (membership index)
// ============================================================================

/// Errors raised by [`crate::tracker::MembershipTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// `startup` was called a second time.
    #[error("membership tracker already started")]
    AlreadyStarted,

    /// `startup` was called after incremental updates were applied.
    #[error("membership tracker received live updates before startup")]
    LiveUpdatesBegun,
}

impl TrackerError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "already_started",
            Self::LiveUpdatesBegun => "live_updates_begun",
        }
    }
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Errors surfaced by [`crate::dispatcher::Dispatcher`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The user id collides with the global sentinel.
    #[error("user id {0:?} is reserved for the global receiver")]
    ReservedUserId(String),

    /// A receiver's registration hook failed. The receiver stays installed.
    #[error(transparent)]
    Hook(#[from] anyhow::Error),

    /// Room invalidation needs the global receiver and none is registered.
    #[error("no global receiver registered")]
    NoGlobalReceiver,

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl DispatchError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ReservedUserId(_) => "reserved_user_id",
            Self::Hook(_) => "hook_failed",
            Self::NoGlobalReceiver => "no_global_receiver",
            Self::Tracker(e) => e.error_code(),
        }
    }
}
