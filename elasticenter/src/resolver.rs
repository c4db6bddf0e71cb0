//! Referential lookups
//!
//! The controller offers no exact-match queries, so every lookup lists the
//! whole collection and filters locally. Matches are exact and the first one
//! wins.

use tracing::debug;

use crate::client::{ElastiCenterClient, Params, commands};
use crate::error::{ApiError, Result};
use crate::types::{
    ListAccountResponse, ListFilesystemResponse, ListInitiatorsResponse,
    ListIscsiServiceResponse, ListTsmResponse, Tenant, Volume,
};

fn single(key: &str, value: &str) -> Params {
    Params::from([(key.to_string(), value.to_string())])
}

impl ElastiCenterClient {
    /// Look up an account id by account name.
    pub async fn resolve_account_id(&self, account_name: &str) -> Result<String> {
        let response: ListAccountResponse = self
            .invoke_as(commands::LIST_ACCOUNT, &Params::new())
            .await?;

        let account = response
            .body
            .account
            .into_iter()
            .find(|a| a.name == account_name)
            .ok_or_else(|| ApiError::not_found("account", account_name))?;
        let id = account.id.ok_or_else(|| {
            ApiError::missing_field(commands::LIST_ACCOUNT, "account", account_name, "id")
        })?;

        debug!(account = account_name, account_id = %id, "Resolved account");
        Ok(id)
    }

    /// Look up a tenant (TSM) of an account by name.
    pub async fn resolve_tenant(&self, tenant_name: &str, account_id: &str) -> Result<Tenant> {
        let response: ListTsmResponse = self
            .invoke_as(commands::LIST_TSM, &single("accountid", account_id))
            .await?;

        let record = response
            .body
            .tsms
            .unwrap_or_default()
            .into_iter()
            .find(|t| t.name == tenant_name)
            .ok_or_else(|| ApiError::not_found("tenant", tenant_name))?;

        let missing = |field: &str| {
            ApiError::missing_field(commands::LIST_TSM, "tenant", tenant_name, field)
        };
        let tenant = Tenant {
            id: record.id.ok_or_else(|| missing("id"))?,
            quota_container_id: record.quota_container_id.ok_or_else(|| missing("datasetid"))?,
            name: record.name,
        };

        debug!(
            tenant = tenant_name,
            tenant_id = %tenant.id,
            quota_container_id = %tenant.quota_container_id,
            "Resolved tenant"
        );
        Ok(tenant)
    }

    /// List every volume on the controller.
    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let response: ListFilesystemResponse = self
            .invoke_as(commands::LIST_FILESYSTEM, &Params::new())
            .await?;
        debug!(count = response.body.filesystem.len(), "Listed volumes");
        Ok(response.body.filesystem)
    }

    /// Find a volume by name. A miss is an error.
    pub async fn resolve_volume_by_name(&self, name: &str) -> Result<Volume> {
        self.list_volumes()
            .await?
            .into_iter()
            .find(|v| !v.name.is_empty() && v.name == name)
            .ok_or_else(|| ApiError::not_found("volume", name))
    }

    /// Find a volume by id. A miss is `None`, since callers use this to
    /// detect volumes that are already gone.
    pub async fn resolve_volume_by_id(&self, volume_id: &str) -> Result<Option<Volume>> {
        Ok(self
            .list_volumes()
            .await?
            .into_iter()
            .find(|v| !v.id.is_empty() && v.id == volume_id))
    }

    /// Find the iSCSI service bound to a volume.
    pub async fn resolve_transport_service_id(&self, volume_id: &str) -> Result<String> {
        let response: ListIscsiServiceResponse = self
            .invoke_as(commands::LIST_ISCSI_SERVICE, &single("storageid", volume_id))
            .await?;

        let service = response
            .body
            .services
            .into_iter()
            .find(|s| s.volume_id == volume_id)
            .ok_or_else(|| ApiError::not_found("iSCSI service for volume", volume_id))?;
        service.id.ok_or_else(|| {
            ApiError::missing_field(
                commands::LIST_ISCSI_SERVICE,
                "iSCSI service for volume",
                volume_id,
                "id",
            )
        })
    }

    /// Find the initiator group named `group` for an account.
    ///
    /// With `required` set, a miss is `NotFound`; otherwise it is `None` and
    /// the caller decides.
    pub async fn resolve_initiator_group_id(
        &self,
        account_id: &str,
        group: &str,
        required: bool,
    ) -> Result<Option<String>> {
        let response: ListInitiatorsResponse = self
            .invoke_as(commands::LIST_ISCSI_INITIATOR, &single("accountid", account_id))
            .await?;

        let initiator = response
            .body
            .initiators
            .into_iter()
            .find(|i| i.group.as_deref() == Some(group));

        match initiator {
            Some(initiator) => initiator.id.map(Some).ok_or_else(|| {
                ApiError::missing_field(
                    commands::LIST_ISCSI_INITIATOR,
                    "initiator group",
                    group,
                    "id",
                )
            }),
            None if required => Err(ApiError::not_found("initiator group", group)),
            None => Ok(None),
        }
    }
}
