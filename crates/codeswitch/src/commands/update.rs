//! Update commands

use anyhow::{anyhow, bail, Context, Result};
use codeswitch_core::types::PolicySetting;
use codeswitch_update::{
    ReconcileOutcome, ServiceOptions, UpdateInfo, UpdateService, UpdateState,
};
use dialoguer::Confirm;
use std::sync::Arc;
use tracing::debug;

use crate::cli::{
    UpdateCheckArgs, UpdateCommands, UpdateDismissArgs, UpdateInstallArgs, UpdateStatusArgs,
};
use crate::host::TerminalHost;
use crate::output;
use crate::version::VersionInfo;

pub async fn run(command: UpdateCommands, quiet: bool) -> Result<()> {
    match command {
        UpdateCommands::Check(args) => check(args).await,
        UpdateCommands::Install(args) => install(args, quiet).await,
        UpdateCommands::Status(args) => status(args),
        UpdateCommands::Dismiss(args) => dismiss(args),
        UpdateCommands::Dismissed => dismissed(),
    }
}

/// Build the engine for this process and report what startup found.
/// `policy` overrides the configured install policy.
fn start_service(host: Arc<TerminalHost>, policy: Option<PolicySetting>) -> Result<UpdateService> {
    let mut options = ServiceOptions::from_environment(VersionInfo::current().tag())
        .context("Failed to load update configuration")?;
    if let Some(policy) = policy {
        options.config.installer.policy = policy;
    }
    let service = UpdateService::new(options, host).context("Failed to start the update engine")?;

    match service.startup_reconciliation() {
        ReconcileOutcome::Applied { version } => {
            output::success(&format!("Updated to {}", version));
        }
        ReconcileOutcome::Restored { info, .. } => {
            output::info(&format!(
                "Update to {} did not finish; the verified download is still staged",
                info.version
            ));
        }
        ReconcileOutcome::Discarded { version } => {
            output::warning(&format!(
                "Update to {} did not finish and its download was discarded",
                version
            ));
        }
        ReconcileOutcome::NoMarker => {}
    }

    Ok(service)
}

fn print_release(info: &UpdateInfo) {
    if let Some(date) = info.pub_date {
        output::kv("Published", &date.format("%Y-%m-%d").to_string());
    }
    if info.size > 0 {
        output::kv("Size", &format!("{} bytes", info.size));
    }
    if !info.notes.trim().is_empty() {
        println!("\nRelease notes:\n{}\n", output::notes_preview(&info.notes, 10));
    }
}

async fn check(args: UpdateCheckArgs) -> Result<()> {
    let service = start_service(Arc::new(TerminalHost::new(false)), None)?;

    if !args.json {
        output::info(&format!("Current version: {}", service.current_version()));
    }

    let spinner = output::spinner("Checking for updates...");
    let result = service.check_update().await;
    spinner.finish_and_clear();
    let update = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&service.state())?);
        return Ok(());
    }

    match update {
        Some(info) => {
            output::success(&format!("Update available: {}", info.version));
            print_release(&info);
            if info.can_auto_download() {
                output::info("Run 'codeswitch update install' to install it");
            } else {
                output::warning(&format!(
                    "This release has no published checksum; download it manually from {}",
                    info.download_url
                ));
            }
        }
        None => output::success("Already on the latest version"),
    }

    Ok(())
}

async fn install(args: UpdateInstallArgs, quiet: bool) -> Result<()> {
    let host = Arc::new(TerminalHost::new(!quiet));
    let service = start_service(host.clone(), args.policy)?;

    if service.state().state == UpdateState::Ready {
        output::info("A verified update is already staged");
    } else {
        let spinner = output::spinner("Checking for updates...");
        let result = service.check_update().await;
        spinner.finish_and_clear();

        let Some(info) = result? else {
            output::success("Already on the latest version");
            return Ok(());
        };

        output::info(&format!(
            "Update available: {} -> {}",
            service.current_version(),
            info.version
        ));
        print_release(&info);

        if !info.can_auto_download() {
            bail!(
                "{} has no published checksum; download it manually from {}",
                info.version,
                info.download_url
            );
        }

        if !args.yes {
            let confirmed = Confirm::new()
                .with_prompt(format!("Install {}?", info.version))
                .default(true)
                .interact()?;
            if !confirmed {
                output::info("Update cancelled");
                return Ok(());
            }
        }

        service.download_update()?;
        if !wait_for_download(&service, &host).await? {
            return Ok(());
        }
        output::success("Download verified");
    }

    service.request_restart()?;
    host.quit_requested().await;
    output::success(&format!(
        "Update helper started (policy: {}); it finishes once this process exits",
        service.policy()
    ));
    Ok(())
}

/// Wait for the download to finish. Returns `false` when the user cancelled.
async fn wait_for_download(service: &UpdateService, host: &TerminalHost) -> Result<bool> {
    let mut states = host.subscribe();
    loop {
        let state = *states.borrow_and_update();
        match state {
            UpdateState::Ready => return Ok(true),
            UpdateState::Error => {
                let reason = service
                    .state()
                    .error
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(anyhow!("Download failed: {}", reason));
            }
            UpdateState::Available => {
                output::warning("Download stopped; run the command again to resume");
                return Ok(false);
            }
            _ => {}
        }

        tokio::select! {
            changed = states.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                match service.cancel_download() {
                    Ok(()) => {
                        service.wait_for_transfer().await;
                        output::warning("Download cancelled; progress saved, run the command again to resume");
                        return Ok(false);
                    }
                    Err(e) => debug!("Cancel ignored: {}", e),
                }
            }
        }
    }
}

fn status(args: UpdateStatusArgs) -> Result<()> {
    let service = start_service(Arc::new(TerminalHost::new(false)), None)?;
    let snapshot = service.state();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    output::header("Update status");
    output::kv("Current version", &snapshot.current_version);
    output::kv("State", snapshot.state.as_str());
    output::kv("Install policy", &snapshot.policy.to_string());
    if let Some(latest) = &snapshot.latest_version {
        output::kv("Latest version", latest);
    }
    if snapshot.total_bytes > 0 {
        output::kv(
            "Downloaded",
            &format!(
                "{} / {} bytes ({:.0}%)",
                snapshot.downloaded_bytes, snapshot.total_bytes, snapshot.progress
            ),
        );
    }
    if let Some(version) = service.dismissed_version() {
        output::kv("Dismissed", &version);
    }
    if let Some(error) = &snapshot.error {
        output::kv("Last error", error);
    }
    Ok(())
}

fn dismiss(args: UpdateDismissArgs) -> Result<()> {
    let service = start_service(Arc::new(TerminalHost::new(false)), None)?;
    service.dismiss_update(&args.target_version)?;
    output::success(&format!("{} will not be offered again", args.target_version.trim()));
    Ok(())
}

fn dismissed() -> Result<()> {
    let service = start_service(Arc::new(TerminalHost::new(false)), None)?;
    match service.dismissed_version() {
        Some(version) => println!("{}", version),
        None => output::info("No version dismissed"),
    }
    Ok(())
}
