//! Caller-facing types and unit conversions.
//!
//! The controller takes quotas in whole gigabytes and reports allocated space
//! in megabytes; callers always see bytes.

use std::fmt::{self, Display};

use elasticenter::Volume;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DriverError, Result};

/// Allocation unit exposed to hosts: 1 GiB.
pub const ALLOCATION_UNIT: u64 = 1024 * 1024 * 1024;

/// Bytes per megabyte as reported by the controller.
pub const MIB: u64 = 1024 * 1024;

/// Quota string for `createVolume`, rounded down to whole gigabytes (e.g. `"5G"`).
pub fn quota_size(size_bytes: u64) -> String {
    format!("{}G", size_bytes / ALLOCATION_UNIT)
}

/// Size in bytes of a controller size given in megabytes, saturating at `u64::MAX`.
pub const fn mib_to_bytes(size_mb: u64) -> u64 {
    size_mb.saturating_mul(MIB)
}

/// Name of the QoS group created for a volume.
pub fn qos_group_name(volume_name: &str) -> String {
    format!("QoS_{}", volume_name)
}

// ============================================================================
// BlockDeviceVolume
// ============================================================================

/// A volume as seen by the host. Rebuilt from the controller on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceVolume {
    /// Controller-assigned volume id
    pub blockdevice_id: String,
    /// Size in bytes
    pub size: u64,
    /// Host the volume is attached to, if any
    pub attached_to: Option<String>,
    /// Dataset the volume was created for (also the remote volume name)
    pub dataset_id: Uuid,
}

impl BlockDeviceVolume {
    /// Project a remote volume, taking the size from its allocated space.
    pub fn from_remote(volume: &Volume, attached_to: Option<String>) -> Result<Self> {
        let dataset_id = Uuid::parse_str(&volume.name)
            .map_err(|_| DriverError::InvalidDatasetId(volume.name.clone()))?;

        Ok(Self {
            blockdevice_id: volume.id.clone(),
            size: mib_to_bytes(volume.current_total_space_mb),
            attached_to,
            dataset_id,
        })
    }
}

// ============================================================================
// InitiatorGroup
// ============================================================================

/// Initiator groups the driver binds iSCSI services to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorGroup {
    /// Any initiator may log in
    All,
    /// Access revoked
    Nobody,
}

impl InitiatorGroup {
    /// Group name as known to the controller.
    pub const fn as_str(self) -> &'static str {
        match self {
            InitiatorGroup::All => "ALL",
            InitiatorGroup::Nobody => "None",
        }
    }
}

impl Display for InitiatorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
