//! Replay input configuration.

use serde::Deserialize;
use std::path::PathBuf;

use super::types::default_true;

/// Inputs for the replay binary.
///
/// `snapshot` is a JSON object mapping room ids to joined user ids and is
/// fed to `Dispatcher::startup`. Each stream is an NDJSON file replayed by
/// its own poller task.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Startup membership snapshot (optional).
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
    /// NDJSON streams, one poller each.
    #[serde(default)]
    pub streams: Vec<PathBuf>,
    /// Print gathered metrics after the replay (default: true).
    #[serde(default = "default_true")]
    pub report_metrics: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            streams: Vec::new(),
            report_metrics: true,
        }
    }
}
