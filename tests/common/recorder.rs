//! Receivers that record every callback into a shared log.

use livesync::{EventData, GlobalReceiver, Receipt, Receiver, SyncContext};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Call {
    NewEvent {
        event_id: String,
        seq: i64,
        force_initial: bool,
        join_count: usize,
        invite_count: usize,
    },
    Receipt { room_id: String },
    Ephemeral { room_id: String },
    Registered,
    LeftRoom { room_id: String },
    Invite { room_id: String, state_len: usize },
    InvalidateRoom { room_id: String },
}

/// Ordered log of `(receiver name, call)` shared across receivers.
pub type CallLog = Arc<Mutex<Vec<(String, Call)>>>;

pub struct RecordingReceiver {
    name: String,
    log: CallLog,
    fail_registration: bool,
}

#[allow(dead_code)]
impl RecordingReceiver {
    pub fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_registration: false,
        })
    }

    pub fn failing(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_registration: true,
        })
    }

    pub fn new_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Calls recorded for `name`, in order.
    pub fn calls_for(log: &CallLog, name: &str) -> Vec<Call> {
        log.lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Recorded new-event calls for `name`, dropping registration noise.
    pub fn events_for(log: &CallLog, name: &str) -> Vec<Call> {
        Self::calls_for(log, name)
            .into_iter()
            .filter(|c| matches!(c, Call::NewEvent { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.log.lock().push((self.name.clone(), call));
    }
}

impl Receiver for RecordingReceiver {
    fn on_new_event(&self, _ctx: &SyncContext, event: &EventData) {
        self.record(Call::NewEvent {
            event_id: event.event_id.clone(),
            seq: event.seq,
            force_initial: event.force_initial,
            join_count: event.join_count,
            invite_count: event.invite_count,
        });
    }

    fn on_receipt(&self, _ctx: &SyncContext, receipt: &Receipt) {
        self.record(Call::Receipt {
            room_id: receipt.room_id.clone(),
        });
    }

    fn on_ephemeral_event(&self, _ctx: &SyncContext, room_id: &str, _event: &Value) {
        self.record(Call::Ephemeral {
            room_id: room_id.to_string(),
        });
    }

    fn on_registered(&self, _ctx: &SyncContext) -> anyhow::Result<()> {
        self.record(Call::Registered);
        if self.fail_registration {
            anyhow::bail!("{} could not load its cache", self.name);
        }
        Ok(())
    }

    fn on_left_room(&self, _ctx: &SyncContext, room_id: &str, _leave_event: &Value) {
        self.record(Call::LeftRoom {
            room_id: room_id.to_string(),
        });
    }

    fn on_invite(&self, _ctx: &SyncContext, room_id: &str, invite_state: &[Value]) {
        self.record(Call::Invite {
            room_id: room_id.to_string(),
            state_len: invite_state.len(),
        });
    }
}

impl GlobalReceiver for RecordingReceiver {
    fn on_invalidate_room(&self, _ctx: &SyncContext, room_id: &str) {
        self.record(Call::InvalidateRoom {
            room_id: room_id.to_string(),
        });
    }
}
