//! Version information for the codeswitch CLI

use serde::{Deserialize, Serialize};

/// Version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,

    /// Git commit SHA (short)
    pub commit: Option<String>,

    pub build_date: Option<String>,

    /// Target triple
    pub target: Option<String>,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: codeswitch_update::VERSION.to_string(),
            commit: option_env!("GIT_SHA").map(String::from),
            build_date: option_env!("BUILD_DATE").map(String::from),
            target: option_env!("TARGET").map(String::from),
        }
    }

    /// Version in release-tag form, as compared against published releases
    pub fn tag(&self) -> String {
        format!("v{}", self.version.trim_start_matches('v'))
    }

    pub fn display(&self) -> String {
        let mut parts = vec![format!("codeswitch {}", self.version)];

        if let Some(commit) = &self.commit {
            parts.push(format!("({})", commit));
        }
        if let Some(target) = &self.target {
            parts.push(target.clone());
        }

        parts.join(" ")
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
