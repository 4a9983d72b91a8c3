//! Terminal implementation of the update host
//!
//! Renders download progress with indicatif, publishes state changes on a
//! watch channel for the command loop, and turns the engine's quit request
//! into a notification.

use crate::output;
use codeswitch_update::{UpdateEvent, UpdateHost, UpdateState, UpdateStateSnapshot};
use indicatif::ProgressBar;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{watch, Notify};
use tracing::debug;

pub struct TerminalHost {
    show_progress: bool,
    bar: Mutex<Option<ProgressBar>>,
    states: watch::Sender<UpdateState>,
    quit: Notify,
}

impl TerminalHost {
    pub fn new(show_progress: bool) -> Self {
        let (states, _) = watch::channel(UpdateState::Idle);
        Self {
            show_progress,
            bar: Mutex::new(None),
            states,
            quit: Notify::new(),
        }
    }

    /// Receiver that always holds the latest published state
    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.states.subscribe()
    }

    /// Resolves once the engine asked the process to exit
    pub async fn quit_requested(&self) {
        self.quit.notified().await;
    }

    fn on_state(&self, snapshot: &UpdateStateSnapshot) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        match snapshot.state {
            UpdateState::Downloading => {
                if bar.is_none() && self.show_progress {
                    let version = snapshot.latest_version.as_deref().unwrap_or("update");
                    let pb = output::download_bar(snapshot.total_bytes, version);
                    pb.set_position(snapshot.downloaded_bytes);
                    *bar = Some(pb);
                }
            }
            UpdateState::Ready => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("verified");
                }
            }
            _ => {
                if let Some(pb) = bar.take() {
                    pb.abandon();
                }
            }
        }
    }
}

impl UpdateHost for TerminalHost {
    fn emit(&self, event: UpdateEvent) {
        match event {
            UpdateEvent::State(snapshot) => {
                debug!("Update state: {}", snapshot.state);
                self.on_state(&snapshot);
                self.states.send_replace(snapshot.state);
            }
            UpdateEvent::Progress(progress) => {
                let bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(pb) = bar.as_ref() {
                    if progress.total > 0 {
                        pb.set_length(progress.total);
                    }
                    pb.set_position(progress.downloaded);
                }
            }
        }
    }

    fn quit(&self) {
        self.quit.notify_one();
    }
}
