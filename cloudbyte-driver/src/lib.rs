//! CloudByte Block Device Driver Library
//!
//! Provisions ElastiCenter volumes and exposes them to the host as iSCSI
//! block devices.
//!
//! This library provides:
//! - The `BlockDeviceApi` lifecycle operations (create, destroy, attach,
//!   detach, list, device path)
//! - Local iSCSI session management via open-iscsi
//! - Driver configuration with documented defaults

pub mod config;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod service;
pub mod types;

pub use config::DriverConfig;
pub use error::{DriverError, Result};
pub use service::{BlockDeviceApi, CloudByteBlockDevice};
pub use types::{ALLOCATION_UNIT, BlockDeviceVolume};
