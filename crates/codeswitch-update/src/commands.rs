//! Host-facing command surface
//!
//! Mirrors the calls a UI layer makes into the engine. Commands and replies
//! are serde types so a host can forward them over IPC unchanged.

use crate::error::Result;
use crate::service::UpdateService;
use crate::state::{UpdateInfo, UpdateStateSnapshot};
use serde::{Deserialize, Serialize};

/// A request from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum UpdateCommand {
    CheckUpdate,
    DownloadUpdate,
    CancelDownload,
    RequestRestart,
    DismissUpdate { version: String },
    GetState,
    GetDismissedVersion,
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "snake_case")]
pub enum CommandReply {
    /// Outcome of a check; `None` when no update is offered
    Checked(Option<UpdateInfo>),
    /// Request accepted; progress arrives through events
    Accepted,
    State(UpdateStateSnapshot),
    DismissedVersion(Option<String>),
}

impl UpdateService {
    /// Dispatch one host command
    pub async fn handle(&self, command: UpdateCommand) -> Result<CommandReply> {
        let reply = match command {
            UpdateCommand::CheckUpdate => CommandReply::Checked(self.check_update().await?),
            UpdateCommand::DownloadUpdate => {
                self.download_update()?;
                CommandReply::Accepted
            }
            UpdateCommand::CancelDownload => {
                self.cancel_download()?;
                CommandReply::Accepted
            }
            UpdateCommand::RequestRestart => {
                self.request_restart()?;
                CommandReply::Accepted
            }
            UpdateCommand::DismissUpdate { version } => {
                self.dismiss_update(&version)?;
                CommandReply::Accepted
            }
            UpdateCommand::GetState => CommandReply::State(self.state()),
            UpdateCommand::GetDismissedVersion => {
                CommandReply::DismissedVersion(self.dismissed_version())
            }
        };
        Ok(reply)
    }
}
