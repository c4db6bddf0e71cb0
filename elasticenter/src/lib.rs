//! CloudByte ElastiCenter API client
//!
//! Control-plane access to an ElastiCenter storage controller:
//! - `client`: API key authenticated requests and error classification
//! - `types`: typed response envelopes
//! - `resolver`: account/tenant/volume/iSCSI lookups
//! - `job`: async job confirmation

pub mod client;
pub mod error;
pub mod job;
pub mod resolver;
pub mod types;

pub use client::{ClientConfig, ElastiCenterClient, Params};
pub use error::{ApiError, Result};
pub use job::{JobPoller, JobStatusSource};
pub use types::{JobStatus, Tenant, TransportService, Volume};
