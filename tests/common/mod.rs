//! Integration test common infrastructure.
//!
//! Provides recording receivers and event builders for asserting on
//! dispatch flows.

pub mod events;
pub mod recorder;

#[allow(unused_imports)]
pub use events::{member_event, message_event};
#[allow(unused_imports)]
pub use recorder::{Call, CallLog, RecordingReceiver};
