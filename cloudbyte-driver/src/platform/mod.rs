//! Host-side iSCSI session handling
//!
//! Uses open-iscsi's `iscsiadm` for discovery, login and logout, and the udev
//! `/dev/disk/by-path` links to observe sessions.
//!
//! # Usage
//!
//! ```ignore
//! use crate::platform::{IscsiSessionManager, SessionConfig, SystemCommandRunner};
//!
//! let sessions = IscsiSessionManager::new(SystemCommandRunner, SessionConfig::default());
//! let path = sessions.expected_path("10.0.0.5", "iqn.2016-01.com.cloudbyte:vol");
//! if !sessions.path_exists(&path, 2).await {
//!     sessions.login("10.0.0.5", "iqn.2016-01.com.cloudbyte:vol").await?;
//! }
//! ```

mod linux;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

pub use linux::{ATTACH_PROBES, ISCSI_PORT, IscsiSessionManager, LIST_PROBES, LOGIN_PROBES};
pub(crate) use linux::lists_target;

/// Captured result of an OS command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes OS commands on behalf of the session manager.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Session manager settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding udev's by-path device links
    pub by_path_dir: PathBuf,
    /// Delay between device path probes
    pub probe_interval_ms: u64,
    /// iscsiadm executable
    pub iscsiadm: String,
    /// Run iscsiadm through sudo
    pub use_sudo: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            by_path_dir: PathBuf::from("/dev/disk/by-path"),
            probe_interval_ms: 2000,
            iscsiadm: "iscsiadm".to_string(),
            use_sudo: true,
        }
    }
}
