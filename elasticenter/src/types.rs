//! Typed envelopes for ElastiCenter API responses.
//!
//! Every response is nested one level under a per-command root key. The
//! controller is loose about scalar types (ids and sizes arrive as either
//! JSON strings or numbers), so identifiers are decoded through [`text`] and
//! sizes through [`number`].
//!
//! Listings are decoded row by row leniently: a sibling record with a null or
//! missing field never fails a lookup. Fields a caller relies on are checked
//! on the matched record only (see the resolver).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Decode a JSON string, number or boolean as text.
pub(crate) fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// Like [`text`], but `null` decodes as an empty string.
pub(crate) fn lenient_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    Ok(opt_text(deserializer)?.unwrap_or_default())
}

/// Like [`text`], but `null` decodes as `None`.
pub(crate) fn opt_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// Decode a non-negative number given either as a JSON number or a numeric string.
/// Fractional values are truncated.
pub(crate) fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as u64))
        }
        Value::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| D::Error::custom(format!("invalid numeric value: {value}")))
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListAccountResponse {
    #[serde(rename = "listAccountResponse")]
    pub body: AccountList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountList {
    #[serde(default)]
    pub account: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
}

// ============================================================================
// Tenants (TSMs)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListTsmResponse {
    #[serde(rename = "listTsmResponse")]
    pub body: TsmList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TsmList {
    #[serde(rename = "listTsm", default)]
    pub tsms: Option<Vec<TsmRecord>>,
}

/// A tenant storage machine row as listed by the controller.
#[derive(Debug, Clone, Deserialize)]
pub struct TsmRecord {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(rename = "datasetid", default, deserialize_with = "opt_text")]
    pub quota_container_id: Option<String>,
}

/// A tenant storage machine and the dataset that holds its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Quota container the tenant's volumes are provisioned under
    pub quota_container_id: String,
}

// ============================================================================
// Volumes (filesystems)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListFilesystemResponse {
    #[serde(rename = "listFilesystemResponse")]
    pub body: FilesystemList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemList {
    #[serde(default)]
    pub filesystem: Vec<Volume>,
}

/// A volume as reported by the controller. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Volume {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: String,
    /// Caller-supplied dataset identifier
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    /// Owning tenant
    #[serde(rename = "Tsmid", default, deserialize_with = "opt_text")]
    pub tenant_id: Option<String>,
    /// Portal address of the iSCSI target
    #[serde(rename = "ipaddress", default, deserialize_with = "lenient_text")]
    pub address: String,
    #[serde(rename = "iqnname", default, deserialize_with = "lenient_text")]
    pub target_name: String,
    /// Allocated space in megabytes
    #[serde(rename = "currentTotalSpace", default, deserialize_with = "number")]
    pub current_total_space_mb: u64,
}

// ============================================================================
// QoS groups
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AddQosGroupResponse {
    #[serde(rename = "addqosgroupresponse")]
    pub body: QosGroupBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QosGroupBody {
    pub qosgroup: QosGroup,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QosGroup {
    #[serde(deserialize_with = "text")]
    pub id: String,
}

// ============================================================================
// iSCSI services and initiators
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ListIscsiServiceResponse {
    #[serde(rename = "listVolumeiSCSIServiceResponse")]
    pub body: IscsiServiceList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IscsiServiceList {
    #[serde(rename = "iSCSIService", default)]
    pub services: Vec<TransportService>,
}

/// Binds a volume to the initiator group allowed to log in to it.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportService {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub volume_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListInitiatorsResponse {
    #[serde(rename = "listInitiatorsResponse")]
    pub body: InitiatorList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatorList {
    #[serde(rename = "initiator", default)]
    pub initiators: Vec<Initiator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Initiator {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(rename = "initiatorgroup", default, deserialize_with = "opt_text")]
    pub group: Option<String>,
}

// ============================================================================
// Async jobs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QueryJobResponse {
    #[serde(rename = "queryasyncjobresultresponse")]
    pub body: JobRecord,
}

/// Raw job record returned by `queryAsyncJobResult`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "jobstatus", default, deserialize_with = "number")]
    pub status: u64,
    #[serde(rename = "jobresult", default)]
    pub result: Value,
}

/// Terminal or non-terminal state of an async job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(Value),
    Failed { code: String, text: String },
}

impl From<JobRecord> for JobStatus {
    fn from(record: JobRecord) -> Self {
        match record.status {
            1 => JobStatus::Succeeded(record.result),
            2 => {
                let field = |name: &str| match record.result.get(name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => "unknown".to_string(),
                    Some(other) => other.to_string(),
                };
                JobStatus::Failed {
                    code: field("errorcode"),
                    text: field("errortext"),
                }
            }
            _ => JobStatus::Pending,
        }
    }
}
