//! CLI argument parsing with clap

use clap::{Args, Parser, Subcommand};
use codeswitch_core::types::PolicySetting;

/// CodeSwitch - switch between AI coding providers
#[derive(Parser, Debug)]
#[command(name = "codeswitch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version(VersionArgs),

    /// Check for, download and install updates
    #[command(subcommand)]
    Update(UpdateCommands),
}

// Version command
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// Update commands
#[derive(Subcommand, Debug)]
pub enum UpdateCommands {
    /// Check whether a newer release is available
    Check(UpdateCheckArgs),

    /// Download, verify and install the latest release
    Install(UpdateInstallArgs),

    /// Show the update engine state
    Status(UpdateStatusArgs),

    /// Stop offering a specific version
    Dismiss(UpdateDismissArgs),

    /// Show the dismissed version, if any
    Dismissed,
}

#[derive(Args, Debug)]
pub struct UpdateCheckArgs {
    /// Output the resulting state as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateInstallArgs {
    /// Install without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Override the install policy (auto, portable, installer)
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<PolicySetting>,
}

#[derive(Args, Debug)]
pub struct UpdateStatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateDismissArgs {
    /// Version to dismiss, e.g. v1.2.0
    #[arg(value_name = "VERSION")]
    pub target_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update_install_yes() {
        let cli = Cli::parse_from(["codeswitch", "update", "install", "--yes"]);
        match cli.command {
            Commands::Update(UpdateCommands::Install(args)) => {
                assert!(args.yes);
                assert_eq!(args.policy, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_policy_override() {
        let cli = Cli::parse_from(["codeswitch", "update", "install", "--policy", "Portable"]);
        match cli.command {
            Commands::Update(UpdateCommands::Install(args)) => {
                assert_eq!(args.policy, Some(PolicySetting::Portable))
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["codeswitch", "update", "install", "--policy", "msi"]).is_err());
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["codeswitch", "update", "dismiss", "v1.2.0", "-vv"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Update(UpdateCommands::Dismiss(args)) => assert_eq!(args.target_version, "v1.2.0"),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dismiss_positional_coexists_with_version_flag() {
        let cli = Cli::try_parse_from(["codeswitch", "update", "dismiss", "v1.2.0"]).unwrap();
        match cli.command {
            Commands::Update(UpdateCommands::Dismiss(args)) => {
                assert_eq!(args.target_version, "v1.2.0")
            }
            other => panic!("unexpected command {:?}", other),
        }

        let err = Cli::try_parse_from(["codeswitch", "update", "dismiss", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
