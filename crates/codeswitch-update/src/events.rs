//! Events published to the host application

use crate::state::UpdateStateSnapshot;
use serde::{Deserialize, Serialize};

/// Event name for full state snapshots
pub const STATE_EVENT: &str = "update:state";

/// Event name for download progress
pub const PROGRESS_EVENT: &str = "update:progress";

/// Download progress payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub downloaded: u64,
    pub total: u64,
    pub percent: f64,
}

/// Event delivered to the host
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    State(UpdateStateSnapshot),
    Progress(ProgressEvent),
}

impl UpdateEvent {
    /// Event name as seen by the UI layer
    pub fn name(&self) -> &'static str {
        match self {
            UpdateEvent::State(_) => STATE_EVENT,
            UpdateEvent::Progress(_) => PROGRESS_EVENT,
        }
    }

    /// JSON payload as seen by the UI layer
    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            UpdateEvent::State(snapshot) => serde_json::to_value(snapshot),
            UpdateEvent::Progress(progress) => serde_json::to_value(progress),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// The application hosting the update engine
///
/// Events are fire-and-forget; `emit` must not block. `quit` is called once
/// the installer helper has been launched and the process should exit.
pub trait UpdateHost: Send + Sync {
    fn emit(&self, event: UpdateEvent);

    fn quit(&self);
}

/// Host that discards events and ignores quit requests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl UpdateHost for NoopHost {
    fn emit(&self, _event: UpdateEvent) {}

    fn quit(&self) {}
}
