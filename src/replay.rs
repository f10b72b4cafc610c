//! Replay of recorded upstream traffic through a [`Dispatcher`].
//!
//! A replay starts from a membership snapshot (`{"!room": ["@user", ...]}`)
//! and then feeds one or more NDJSON streams, each line an [`Envelope`].
//! Every stream plays the role of one upstream poller.

use crate::dispatcher::Dispatcher;
use crate::receiver::{GlobalReceiver, Receiver};
use crate::telemetry::SyncContext;
use crate::types::{EventData, Receipt, RoomId, UserId};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Replay errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One line of a replay stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Event {
        room_id: RoomId,
        event: Value,
        #[serde(default)]
        seq: i64,
    },
    InitialState {
        room_id: RoomId,
        state: Vec<Value>,
    },
    Ephemeral {
        room_id: RoomId,
        event: Value,
    },
    Receipt(Receipt),
    Invalidate {
        room_id: RoomId,
        #[serde(default)]
        joins: HashMap<UserId, Value>,
        #[serde(default)]
        invites: HashMap<UserId, Vec<Value>>,
        #[serde(default)]
        leaves: HashMap<UserId, Value>,
    },
    /// A client connected for this user.
    Connect { user_id: UserId },
    /// The user's last client went away.
    Disconnect { user_id: UserId },
}

/// Delivery counters. The global receiver and the per-user receivers of a
/// replay each get their own.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub events: AtomicU64,
    pub forced_initial: AtomicU64,
    pub receipts: AtomicU64,
    pub ephemeral: AtomicU64,
    pub left_rooms: AtomicU64,
    pub invites: AtomicU64,
    pub invalidations: AtomicU64,
}

impl DeliveryStats {
    pub fn summary(&self) -> String {
        format!(
            "events={} forced_initial={} receipts={} ephemeral={} left_rooms={} \
             invites={} invalidations={}",
            self.events.load(Ordering::Relaxed),
            self.forced_initial.load(Ordering::Relaxed),
            self.receipts.load(Ordering::Relaxed),
            self.ephemeral.load(Ordering::Relaxed),
            self.left_rooms.load(Ordering::Relaxed),
            self.invites.load(Ordering::Relaxed),
            self.invalidations.load(Ordering::Relaxed),
        )
    }
}

/// Receiver that only counts what it is handed.
#[derive(Debug)]
pub struct CountingReceiver {
    stats: Arc<DeliveryStats>,
}

impl CountingReceiver {
    pub fn new(stats: Arc<DeliveryStats>) -> Self {
        Self { stats }
    }
}

impl Receiver for CountingReceiver {
    fn on_new_event(&self, _ctx: &SyncContext, event: &EventData) {
        self.stats.events.fetch_add(1, Ordering::Relaxed);
        if event.force_initial {
            self.stats.forced_initial.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_receipt(&self, _ctx: &SyncContext, _receipt: &Receipt) {
        self.stats.receipts.fetch_add(1, Ordering::Relaxed);
    }

    fn on_ephemeral_event(&self, _ctx: &SyncContext, _room_id: &str, _event: &Value) {
        self.stats.ephemeral.fetch_add(1, Ordering::Relaxed);
    }

    fn on_registered(&self, _ctx: &SyncContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_left_room(&self, _ctx: &SyncContext, _room_id: &str, _leave_event: &Value) {
        self.stats.left_rooms.fetch_add(1, Ordering::Relaxed);
    }

    fn on_invite(&self, _ctx: &SyncContext, _room_id: &str, _invite_state: &[Value]) {
        self.stats.invites.fetch_add(1, Ordering::Relaxed);
    }
}

impl GlobalReceiver for CountingReceiver {
    fn on_invalidate_room(&self, _ctx: &SyncContext, _room_id: &str) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Load a room → joined users snapshot.
pub async fn load_snapshot(path: &Path) -> Result<HashMap<RoomId, Vec<UserId>>, ReplayError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
    serde_json::from_str(&content).map_err(|source| ReplayError::Snapshot {
        path: path.display().to_string(),
        source,
    })
}

/// Dispatch a single envelope. Connects install a [`CountingReceiver`]
/// recording into the per-user `stats`.
pub fn apply(
    dispatcher: &Dispatcher,
    ctx: &SyncContext,
    stats: &Arc<DeliveryStats>,
    envelope: Envelope,
) {
    match envelope {
        Envelope::Event {
            room_id,
            event,
            seq,
        } => dispatcher.on_new_event(ctx, &room_id, event, seq),
        Envelope::InitialState { room_id, state } => {
            dispatcher.on_new_initial_room_state(ctx, &room_id, state)
        }
        Envelope::Ephemeral { room_id, event } => {
            dispatcher.on_ephemeral_event(ctx, &room_id, &event)
        }
        Envelope::Receipt(receipt) => dispatcher.on_receipt(ctx, &receipt),
        Envelope::Invalidate {
            room_id,
            joins,
            invites,
            leaves,
        } => {
            let joins: HashMap<UserId, EventData> = joins
                .into_iter()
                .map(|(user_id, event)| (user_id, EventData::new(event, &room_id, 0)))
                .collect();
            if let Err(e) = dispatcher.on_invalidate_room(ctx, &room_id, &joins, &invites, &leaves)
            {
                warn!(room = %room_id, error = %e, "invalidation skipped");
            }
        }
        Envelope::Connect { user_id } => {
            let receiver = Arc::new(CountingReceiver::new(Arc::clone(stats)));
            if let Err(e) = dispatcher.register(ctx, &user_id, receiver) {
                warn!(user = %user_id, error = %e, "register failed");
            }
        }
        Envelope::Disconnect { user_id } => dispatcher.unregister(&user_id),
    }
}

/// Replay one NDJSON stream. Returns the number of envelopes applied.
///
/// Malformed lines are logged and skipped.
pub async fn run_stream(
    dispatcher: Arc<Dispatcher>,
    stats: Arc<DeliveryStats>,
    path: &Path,
) -> Result<usize, ReplayError> {
    let io_err = |source| ReplayError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let mut lines = BufReader::new(file).lines();
    let ctx = SyncContext::current();

    let mut applied = 0usize;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.map_err(io_err)? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                apply(&dispatcher, &ctx, &stats, envelope);
                applied += 1;
            }
            Err(e) => warn!(line = line_no, error = %e, "skipping malformed envelope"),
        }
    }
    info!(path = %path.display(), lines = line_no, applied, "Replayed stream");
    Ok(applied)
}
