//! Linux open-iscsi implementation
//!
//! Session state is never stored; it is probed through the by-path link
//! `ip-<addr>:3260-iscsi-<iqn>-lun-0`, which udev creates once the kernel has
//! attached the LUN.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{CommandOutput, CommandRunner, SessionConfig, SystemCommandRunner};
use crate::error::{DriverError, Result};
use crate::metrics;

/// iSCSI portal port
pub const ISCSI_PORT: u16 = 3260;

/// Probes before deciding a volume is not attached
pub const ATTACH_PROBES: u32 = 2;
/// Probes waiting for the device after a login
pub const LOGIN_PROBES: u32 = 5;
/// Probes while listing volumes
pub const LIST_PROBES: u32 = 1;

/// Manages local iSCSI sessions.
#[derive(Debug, Clone)]
pub struct IscsiSessionManager<R = SystemCommandRunner> {
    runner: R,
    config: SessionConfig,
}

/// Whether a `sendtargets` listing contains `target`.
///
/// Lines look like `10.0.0.5:3260,1 iqn.2016-01.com.cloudbyte:vol`.
pub(crate) fn lists_target(discovered: &[String], target: &str) -> bool {
    discovered
        .iter()
        .any(|line| line.split_whitespace().last() == Some(target))
}

impl<R: CommandRunner> IscsiSessionManager<R> {
    pub fn new(runner: R, config: SessionConfig) -> Self {
        Self { runner, config }
    }

    /// Expected device link for a target's first LUN.
    pub fn expected_path(&self, address: &str, target_name: &str) -> PathBuf {
        self.config.by_path_dir.join(format!(
            "ip-{}:{}-iscsi-{}-lun-0",
            address, ISCSI_PORT, target_name
        ))
    }

    /// Check for `path` up to `max_probes` times, sleeping between probes.
    pub async fn path_exists(&self, path: &Path, max_probes: u32) -> bool {
        let interval = Duration::from_millis(self.config.probe_interval_ms);
        for probe in 1..=max_probes {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return true;
            }
            if probe < max_probes {
                debug!(path = %path.display(), probe, max_probes, "Device path not present yet");
                tokio::time::sleep(interval).await;
            }
        }
        false
    }

    /// Resolve the device node behind a by-path link (e.g. `../../sdb` -> `/dev/sdb`).
    pub async fn resolve_device_node(&self, path: &Path) -> Result<PathBuf> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DriverError::Session(format!(
                "device path {} does not exist",
                path.display()
            )));
        }

        let link = tokio::fs::read_link(path).await?;
        let device = match link.strip_prefix("../..") {
            Ok(rest) => Path::new("/dev").join(rest),
            Err(_) => link,
        };

        // Follow any further links; keep the rewritten path if that fails
        Ok(tokio::fs::canonicalize(&device).await.unwrap_or(device))
    }

    async fn iscsiadm(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = if self.config.use_sudo {
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(self.config.iscsiadm.as_str());
            argv.extend_from_slice(args);
            self.runner.run("sudo", &argv).await
        } else {
            self.runner.run(&self.config.iscsiadm, args).await
        };

        output.map_err(|e| {
            error!(error = %e, args = ?args, "Failed to execute iscsiadm");
            DriverError::Session(format!("failed to execute iscsiadm: {}", e))
        })
    }

    /// Run sendtargets discovery against a portal and return the raw lines.
    pub async fn discover_targets(&self, address: &str) -> Result<Vec<String>> {
        let output = self
            .iscsiadm(&["-m", "discovery", "-t", "sendtargets", "-p", address])
            .await?;

        if !output.success {
            error!(stderr = %output.stderr, portal = %address, "iscsiadm discovery failed");
            return Err(DriverError::Session(format!(
                "iscsiadm discovery at {} failed: {}",
                address,
                output.stderr.trim()
            )));
        }

        let targets: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!(portal = %address, count = targets.len(), "iSCSI discovery successful");
        Ok(targets)
    }

    /// Log in to a target and wait for its device link.
    pub async fn login(&self, address: &str, target_name: &str) -> Result<PathBuf> {
        info!(target_iqn = %target_name, portal = %address, "Logging in to iSCSI target");

        let output = self
            .iscsiadm(&["-m", "node", "-p", address, "-T", target_name, "--login"])
            .await?;

        if !output.success {
            if output.stderr.contains("already present")
                || output.stderr.contains("session already exists")
            {
                info!(target_iqn = %target_name, portal = %address, "iSCSI session already exists");
            } else {
                error!(stderr = %output.stderr, "iscsiadm login failed");
                metrics::record_session_change("login", false);
                return Err(DriverError::Session(format!(
                    "iscsiadm login failed: {}",
                    output.stderr.trim()
                )));
            }
        }

        let path = self.expected_path(address, target_name);
        if !self.path_exists(&path, LOGIN_PROBES).await {
            warn!(path = %path.display(), "Device did not appear after login");
            metrics::record_session_change("login", false);
            return Err(DriverError::Session(format!(
                "failed iSCSI login to device [{}]",
                path.display()
            )));
        }

        metrics::record_session_change("login", true);
        info!(target_iqn = %target_name, path = %path.display(), "iSCSI target connected");
        Ok(path)
    }

    /// Log out of a target and forget its node record.
    pub async fn logout(&self, address: &str, target_name: &str) -> Result<()> {
        info!(target_iqn = %target_name, portal = %address, "Disconnecting from iSCSI target");

        let output = self
            .iscsiadm(&["-m", "node", "-p", address, "-T", target_name, "-u"])
            .await?;
        if !output.success {
            error!(stderr = %output.stderr, "iscsiadm logout failed");
            metrics::record_session_change("logout", false);
            return Err(DriverError::Session(format!(
                "iscsiadm logout failed: {}",
                output.stderr.trim()
            )));
        }

        let output = self
            .iscsiadm(&["-m", "node", "-o", "delete", "-T", target_name])
            .await?;
        if !output.success {
            error!(stderr = %output.stderr, "iscsiadm node delete failed");
            metrics::record_session_change("logout", false);
            return Err(DriverError::Session(format!(
                "iscsiadm node delete failed: {}",
                output.stderr.trim()
            )));
        }

        metrics::record_session_change("logout", true);
        info!(target_iqn = %target_name, "iSCSI target disconnected");
        Ok(())
    }
}
