//! Throttled progress publication

use crate::events::{ProgressEvent, UpdateEvent, UpdateHost};
use crate::state::{percent_of, UpdateState, UpdateStateSnapshot};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Gate for progress emissions
///
/// A state change is admitted immediately. Otherwise an emission needs both
/// `window` elapsed since the last admitted one and a percent change of at
/// least `min_delta`. Reaching 100 % is always admitted once.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    min_delta: f64,
    last_at: Option<Instant>,
    last_percent: Option<f64>,
    last_state: Option<UpdateState>,
}

impl RateLimiter {
    pub fn new(window: Duration, min_delta: u8) -> Self {
        Self {
            window,
            min_delta: f64::from(min_delta),
            last_at: None,
            last_percent: None,
            last_state: None,
        }
    }

    pub fn admit(&mut self, state: UpdateState, percent: f64, now: Instant) -> bool {
        let state_changed = self.last_state != Some(state);
        let admitted = state_changed
            || match (self.last_at, self.last_percent) {
                (Some(at), Some(last)) => {
                    let finished = percent >= 100.0 && last < 100.0;
                    finished
                        || (now.duration_since(at) >= self.window
                            && (percent - last).abs() >= self.min_delta)
                }
                _ => true,
            };

        if admitted {
            self.last_at = Some(now);
            self.last_percent = Some(percent);
            self.last_state = Some(state);
        }
        admitted
    }

    /// Forget history so the next emission is admitted
    pub fn reset(&mut self) {
        self.last_at = None;
        self.last_percent = None;
        self.last_state = None;
    }
}

/// Publishes snapshots unconditionally and progress through the [`RateLimiter`]
pub struct ProgressEmitter {
    host: Arc<dyn UpdateHost>,
    limiter: Mutex<RateLimiter>,
}

impl ProgressEmitter {
    pub fn new(host: Arc<dyn UpdateHost>, window: Duration, min_delta: u8) -> Self {
        Self {
            host,
            limiter: Mutex::new(RateLimiter::new(window, min_delta)),
        }
    }

    pub fn emit_state(&self, snapshot: UpdateStateSnapshot) {
        if snapshot.state != UpdateState::Downloading {
            self.limiter
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
        }
        self.host.emit(UpdateEvent::State(snapshot));
    }

    /// Returns whether the event was published
    pub fn emit_progress(&self, state: UpdateState, downloaded: u64, total: u64) -> bool {
        let percent = percent_of(downloaded, total);
        let admitted = self
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(state, percent, Instant::now());
        if admitted {
            self.host.emit(UpdateEvent::Progress(ProgressEvent {
                downloaded,
                total,
                percent,
            }));
        }
        admitted
    }
}
