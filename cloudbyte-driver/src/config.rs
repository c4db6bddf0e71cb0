//! Driver configuration
//!
//! Loaded from a JSON document. Option names used by existing CloudByte
//! deployments (`vsm_name`, `apikey`, `elasticenter_ip`, `add_qosgroup`,
//! `create_volume`, `confirm_volume_*`) are accepted as aliases.

use std::path::Path;
use std::time::Duration;

use elasticenter::{ClientConfig, JobPoller, Params};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{DriverError, Result};
use crate::platform::SessionConfig;

/// Default QoS group parameters.
pub const DEFAULT_QOS_GROUP: &[(&str, &str)] = &[
    ("iops", "100"),
    ("latency", "15"),
    ("graceallowed", "false"),
    ("networkspeed", "0"),
    ("memlimit", "0"),
    ("tpcontrol", "false"),
    ("throughput", "0"),
    ("iopscontrol", "true"),
];

/// Default volume creation parameters.
pub const DEFAULT_VOLUME: &[(&str, &str)] = &[
    ("blocklength", "512B"),
    ("compression", "off"),
    ("deduplication", "off"),
    ("sync", "always"),
    ("recordsize", "16k"),
    ("protocoltype", "ISCSI"),
];

/// Default performance profiles (name -> IOPS target).
pub const DEFAULT_PROFILES: &[(&str, &str)] =
    &[("gold", "10000"), ("silver", "500"), ("bronze", "100")];

fn to_params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Decode a map whose values may be strings, numbers or booleans into text.
fn text_map<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Params, D::Error> {
    let map = Option::<serde_json::Map<String, Value>>::deserialize(deserializer)?;
    map.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "value for '{}' must be a string, number or boolean, got {}",
                        key, other
                    )));
                }
            };
            Ok((key, text))
        })
        .collect()
}

/// Profiles replace the defaults wholesale; an empty or null map keeps them.
fn profile_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Params, D::Error> {
    let profiles = text_map(deserializer)?;
    if profiles.is_empty() {
        Ok(to_params(DEFAULT_PROFILES))
    } else {
        Ok(profiles)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// ElastiCenter address: bare host (HTTPS) or base URL
    #[serde(alias = "elasticenter_ip")]
    pub controller_address: Option<String>,
    #[serde(alias = "apikey")]
    pub api_key: Option<String>,
    /// Tenant storage machine volumes are provisioned under
    #[serde(alias = "vsm_name")]
    pub tenant_name: Option<String>,
    pub account_name: Option<String>,
    pub accept_invalid_certs: bool,

    #[serde(alias = "confirm_volume_create_retries")]
    pub create_retries: u32,
    #[serde(alias = "confirm_volume_create_retry_interval")]
    pub create_retry_interval_secs: u64,
    #[serde(alias = "confirm_volume_delete_retries")]
    pub delete_retries: u32,
    #[serde(alias = "confirm_volume_delete_retry_interval")]
    pub delete_retry_interval_secs: u64,

    #[serde(alias = "add_qosgroup", deserialize_with = "text_map")]
    pub qos_group: Params,
    #[serde(alias = "create_volume", deserialize_with = "text_map")]
    pub volume: Params,
    #[serde(deserialize_with = "profile_map")]
    pub profiles: Params,

    /// Overrides the address-derived instance id
    pub instance_id: Option<String>,
    pub iscsi: SessionConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            controller_address: None,
            api_key: None,
            tenant_name: None,
            account_name: None,
            accept_invalid_certs: false,
            create_retries: 10,
            create_retry_interval_secs: 5,
            delete_retries: 10,
            delete_retry_interval_secs: 5,
            qos_group: to_params(DEFAULT_QOS_GROUP),
            volume: to_params(DEFAULT_VOLUME),
            profiles: to_params(DEFAULT_PROFILES),
            instance_id: None,
            iscsi: SessionConfig::default(),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DriverError::Configuration(format!(
            "missing configuration: {}",
            name
        ))),
    }
}

impl DriverConfig {
    /// Read a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            DriverError::Configuration(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Check that every mandatory setting is present.
    pub fn validate(&self) -> Result<()> {
        required(&self.tenant_name, "tenant_name")?;
        required(&self.account_name, "account_name")?;
        required(&self.api_key, "api_key")?;
        required(&self.controller_address, "controller_address")?;
        Ok(())
    }

    pub fn tenant(&self) -> Result<&str> {
        required(&self.tenant_name, "tenant_name")
    }

    pub fn account(&self) -> Result<&str> {
        required(&self.account_name, "account_name")
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(
            required(&self.controller_address, "controller_address")?,
            required(&self.api_key, "api_key")?,
        );
        config.accept_invalid_certs = self.accept_invalid_certs;
        Ok(config)
    }

    pub fn create_poller(&self) -> JobPoller {
        JobPoller::new(
            self.create_retries,
            Duration::from_secs(self.create_retry_interval_secs),
        )
    }

    pub fn delete_poller(&self) -> JobPoller {
        JobPoller::new(
            self.delete_retries,
            Duration::from_secs(self.delete_retry_interval_secs),
        )
    }
}
