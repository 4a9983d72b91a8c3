//! Test doubles for the host application and the installer helper

use codeswitch_update::{
    ApplyPlan, Installer, ProgressEvent, UpdateError, UpdateEvent, UpdateHost, UpdateService,
    UpdateState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Host that records every event and quit request
#[derive(Default)]
pub struct RecordingHost {
    events: Mutex<Vec<UpdateEvent>>,
    quits: AtomicUsize,
    cancel_on_progress: Mutex<Option<UpdateService>>,
}

impl RecordingHost {
    /// Cancel `service`'s download from the first progress event that reports
    /// received bytes, the way a user clicking "cancel" mid-transfer would
    pub fn cancel_on_first_progress(&self, service: UpdateService) {
        *self.cancel_on_progress.lock().unwrap() = Some(service);
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events.lock().unwrap().clone()
    }

    /// States in the order they were published
    pub fn states(&self) -> Vec<UpdateState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UpdateEvent::State(snapshot) => Some(snapshot.state),
                UpdateEvent::Progress(_) => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UpdateEvent::Progress(p) => Some(p),
                UpdateEvent::State(_) => None,
            })
            .collect()
    }

    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
}

impl UpdateHost for RecordingHost {
    fn emit(&self, event: UpdateEvent) {
        let canceller = match &event {
            UpdateEvent::Progress(p) if p.downloaded > 0 => {
                self.cancel_on_progress.lock().unwrap().take()
            }
            _ => None,
        };
        self.events.lock().unwrap().push(event);
        if let Some(service) = canceller {
            service.cancel_download().unwrap();
        }
    }

    fn quit(&self) {
        self.quits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Installer that records plans instead of spawning a helper
#[derive(Default)]
pub struct FakeInstaller {
    plans: Mutex<Vec<ApplyPlan>>,
    fail: bool,
}

impl FakeInstaller {
    pub fn failing() -> Self {
        Self {
            plans: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn plans(&self) -> Vec<ApplyPlan> {
        self.plans.lock().unwrap().clone()
    }
}

impl Installer for FakeInstaller {
    fn launch(&self, plan: &ApplyPlan) -> codeswitch_update::Result<()> {
        self.plans.lock().unwrap().push(plan.clone());
        if self.fail {
            Err(UpdateError::Launch("helper refused to start".to_string()))
        } else {
            Ok(())
        }
    }
}
