//! Volume lifecycle orchestration
//!
//! Drives the ElastiCenter controller through the provisioning workflow and
//! reconciles the result with local iSCSI sessions. Nothing is cached: every
//! operation re-reads the controller state it depends on, and runs its steps
//! in order until one fails. Failed steps are not compensated.

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use elasticenter::{ApiError, ElastiCenterClient, JobPoller, Params, Volume};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::metrics::OperationTimer;
use crate::platform::{
    ATTACH_PROBES, CommandRunner, IscsiSessionManager, LIST_PROBES, SystemCommandRunner,
    lists_target,
};
use crate::types::{ALLOCATION_UNIT, BlockDeviceVolume, InitiatorGroup, qos_group_name, quota_size};

/// Response envelope carrying the create job id
const CREATE_ENVELOPE: &str = "createvolumeresponse";
/// Response envelope carrying the delete job id
const DELETE_ENVELOPE: &str = "deleteFileSystemResponse";

/// Block device operations offered to a host orchestrator.
#[async_trait]
pub trait BlockDeviceApi: Send + Sync {
    /// Sizes handed to `create_volume` should be multiples of this.
    fn allocation_unit(&self) -> u64;

    /// Identifier of this host, as used in `attached_to`.
    async fn compute_instance_id(&self) -> Result<String>;

    async fn create_volume(&self, dataset_id: Uuid, size: u64) -> Result<BlockDeviceVolume> {
        self.create_volume_with_profile(dataset_id, size, None).await
    }

    async fn create_volume_with_profile(
        &self,
        dataset_id: Uuid,
        size: u64,
        profile_name: Option<&str>,
    ) -> Result<BlockDeviceVolume>;

    /// Delete a volume. Deleting a volume that no longer exists succeeds.
    async fn destroy_volume(&self, blockdevice_id: &str) -> Result<()>;

    async fn attach_volume(&self, blockdevice_id: &str, attach_to: &str)
    -> Result<BlockDeviceVolume>;

    async fn detach_volume(&self, blockdevice_id: &str) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<BlockDeviceVolume>>;

    /// Device node of an attached volume.
    async fn get_device_path(&self, blockdevice_id: &str) -> Result<PathBuf>;
}

/// [`BlockDeviceApi`] backed by a CloudByte ElastiCenter controller.
pub struct CloudByteBlockDevice<R = SystemCommandRunner> {
    client: ElastiCenterClient,
    sessions: IscsiSessionManager<R>,
    config: DriverConfig,
    create_poller: JobPoller,
    delete_poller: JobPoller,
}

impl CloudByteBlockDevice<SystemCommandRunner> {
    /// Build a driver that runs iscsiadm on this host.
    pub fn new(config: DriverConfig) -> Result<Self> {
        Self::with_runner(config, SystemCommandRunner)
    }
}

impl<R: CommandRunner> CloudByteBlockDevice<R> {
    /// Build a driver with a custom command runner.
    ///
    /// Fails with a configuration error if tenant, account, API key or
    /// controller address is missing.
    pub fn with_runner(config: DriverConfig, runner: R) -> Result<Self> {
        config.validate()?;

        let client = ElastiCenterClient::new(config.client_config()?)?;
        let sessions = IscsiSessionManager::new(runner, config.iscsi.clone());

        info!(
            controller = %client.endpoint(),
            tenant = ?config.tenant_name,
            account = ?config.account_name,
            "CloudByte block device driver initialized"
        );

        Ok(Self {
            client,
            sessions,
            create_poller: config.create_poller(),
            delete_poller: config.delete_poller(),
            config,
        })
    }

    /// IOPS target of a named performance profile.
    ///
    /// Unknown profiles and profiles mapped to an empty value are
    /// configuration errors.
    fn profile_iops(&self, profile_name: Option<&str>) -> Result<Option<String>> {
        let Some(profile) = profile_name else {
            return Ok(None);
        };
        match self.config.profiles.get(profile).map(|iops| iops.trim()) {
            Some(iops) if !iops.is_empty() => Ok(Some(iops.to_string())),
            _ => Err(DriverError::Configuration(format!(
                "requested profile not found [{}]",
                profile
            ))),
        }
    }

    /// QoS group parameters: name and tenant, configured defaults, then the
    /// profile's IOPS target.
    fn qos_group_params(&self, tenant_id: &str, volume_name: &str, iops: Option<String>) -> Params {
        let mut params = Params::from([
            ("name".to_string(), qos_group_name(volume_name)),
            ("tsmid".to_string(), tenant_id.to_string()),
        ]);
        params.extend(self.config.qos_group.clone());
        if let Some(iops) = iops {
            params.insert("iops".to_string(), iops);
        }
        params
    }

    /// Look up a volume that must exist.
    async fn volume(&self, blockdevice_id: &str) -> Result<Volume> {
        self.client
            .resolve_volume_by_id(blockdevice_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound {
                    kind: "volume",
                    name: blockdevice_id.to_string(),
                }
                .into()
            })
    }

    /// Bind a volume's iSCSI service to `group`.
    ///
    /// Granting access requires the group to exist; revoking is skipped when
    /// the controller has no record for it.
    async fn set_initiator_group(
        &self,
        account_id: &str,
        volume_id: &str,
        group: InitiatorGroup,
    ) -> Result<()> {
        let service_id = self.client.resolve_transport_service_id(volume_id).await?;
        let group_id = self
            .client
            .resolve_initiator_group_id(account_id, group.as_str(), group == InitiatorGroup::All)
            .await?;

        match group_id {
            Some(group_id) => {
                self.client
                    .update_transport_service(&service_id, Some(&group_id))
                    .await?;
                info!(volume_id, service_id = %service_id, group = %group, "Updated iSCSI initiator group");
            }
            None => {
                warn!(volume_id, group = %group, "Initiator group not found, leaving iSCSI service unchanged");
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        dataset_id: Uuid,
        size: u64,
        profile_name: Option<&str>,
    ) -> Result<BlockDeviceVolume> {
        let volume_name = dataset_id.to_string();
        let iops = self.profile_iops(profile_name)?;

        let account_id = self.client.resolve_account_id(self.config.account()?).await?;
        let tenant = self
            .client
            .resolve_tenant(self.config.tenant()?, &account_id)
            .await?;

        let qos_params = self.qos_group_params(&tenant.id, &volume_name, iops);
        let qos_group_id = self.client.add_qos_group(&qos_params).await?;
        debug!(volume = %volume_name, qos_group_id = %qos_group_id, "Created QoS group");

        let mut params = Params::from([
            ("datasetid".to_string(), tenant.quota_container_id.clone()),
            ("name".to_string(), volume_name.clone()),
            ("qosgroupid".to_string(), qos_group_id),
            ("tsmid".to_string(), tenant.id.clone()),
            ("quotasize".to_string(), quota_size(size)),
        ]);
        params.extend(self.config.volume.clone());

        let submitted = self.client.create_volume(&params).await?;
        self.create_poller
            .await_job(&self.client, &submitted, CREATE_ENVELOPE, "Create Volume", &volume_name)
            .await?;

        let volume = self.client.resolve_volume_by_name(&volume_name).await?;
        self.set_initiator_group(&account_id, &volume.id, InitiatorGroup::All)
            .await?;

        info!(volume = %volume_name, volume_id = %volume.id, size, "Volume created");
        Ok(BlockDeviceVolume {
            blockdevice_id: volume.id,
            size,
            attached_to: None,
            dataset_id,
        })
    }

    async fn destroy(&self, blockdevice_id: &str) -> Result<()> {
        let Some(volume) = self.client.resolve_volume_by_id(blockdevice_id).await? else {
            info!(volume_id = blockdevice_id, "Volume already deleted (idempotent)");
            return Ok(());
        };

        let account_id = self.client.resolve_account_id(self.config.account()?).await?;
        self.set_initiator_group(&account_id, &volume.id, InitiatorGroup::Nobody)
            .await?;

        let submitted = self.client.delete_volume(&volume.id).await?;
        self.delete_poller
            .await_job(&self.client, &submitted, DELETE_ENVELOPE, "Delete Volume", &volume.id)
            .await?;

        info!(volume_id = blockdevice_id, "Volume deleted");
        Ok(())
    }

    async fn attach(&self, blockdevice_id: &str, attach_to: &str) -> Result<BlockDeviceVolume> {
        let volume = self.volume(blockdevice_id).await?;
        let path = self
            .sessions
            .expected_path(&volume.address, &volume.target_name);

        if self.sessions.path_exists(&path, ATTACH_PROBES).await {
            debug!(volume_id = blockdevice_id, path = %path.display(), "Volume already attached");
        } else {
            let targets = self.sessions.discover_targets(&volume.address).await?;
            if !lists_target(&targets, &volume.target_name) {
                warn!(
                    volume_id = blockdevice_id,
                    target_iqn = %volume.target_name,
                    discovered = ?targets,
                    "Target not found during discovery"
                );
                return Err(DriverError::TargetNotDiscovered {
                    portal: volume.address.clone(),
                    target: volume.target_name.clone(),
                });
            }
            self.sessions
                .login(&volume.address, &volume.target_name)
                .await?;
        }

        BlockDeviceVolume::from_remote(&volume, Some(attach_to.to_string()))
    }

    async fn detach(&self, blockdevice_id: &str) -> Result<()> {
        let volume = self.volume(blockdevice_id).await?;
        let path = self
            .sessions
            .expected_path(&volume.address, &volume.target_name);

        if !self.sessions.path_exists(&path, ATTACH_PROBES).await {
            return Err(DriverError::NotAttached(blockdevice_id.to_string()));
        }

        self.sessions
            .logout(&volume.address, &volume.target_name)
            .await
    }

    async fn list(&self) -> Result<Vec<BlockDeviceVolume>> {
        let account_id = self.client.resolve_account_id(self.config.account()?).await?;
        let tenant = self
            .client
            .resolve_tenant(self.config.tenant()?, &account_id)
            .await?;

        let mut instance_id: Option<String> = None;
        let mut volumes = Vec::new();

        for volume in self.client.list_volumes().await? {
            if volume.tenant_id.as_deref() != Some(tenant.id.as_str()) {
                continue;
            }

            let path = self
                .sessions
                .expected_path(&volume.address, &volume.target_name);
            let attached_to = if self.sessions.path_exists(&path, LIST_PROBES).await {
                if instance_id.is_none() {
                    instance_id = Some(self.instance_id().await?);
                }
                instance_id.clone()
            } else {
                None
            };

            match BlockDeviceVolume::from_remote(&volume, attached_to) {
                Ok(projected) => volumes.push(projected),
                Err(e) => warn!(volume_id = %volume.id, error = %e, "Skipping volume"),
            }
        }

        debug!(tenant = %tenant.name, count = volumes.len(), "Listed volumes");
        Ok(volumes)
    }

    async fn device_path(&self, blockdevice_id: &str) -> Result<PathBuf> {
        let volume = self.volume(blockdevice_id).await?;
        let path = self
            .sessions
            .expected_path(&volume.address, &volume.target_name);
        self.sessions.resolve_device_node(&path).await
    }

    async fn instance_id(&self) -> Result<String> {
        if let Some(id) = self.config.instance_id.as_deref().map(str::trim)
            && !id.is_empty()
        {
            return Ok(id.to_string());
        }

        let host = hostname::get()?.to_string_lossy().into_owned();
        match tokio::net::lookup_host((host.as_str(), 0)).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if let Some(addr) = addrs.iter().find(|a| a.is_ipv4()).or(addrs.first()) {
                    return Ok(addr.ip().to_string());
                }
                warn!(host = %host, "Hostname resolved to no addresses");
            }
            Err(e) => warn!(host = %host, error = %e, "Failed to resolve hostname"),
        }
        Ok(host)
    }
}

#[async_trait]
impl<R: CommandRunner> BlockDeviceApi for CloudByteBlockDevice<R> {
    fn allocation_unit(&self) -> u64 {
        ALLOCATION_UNIT
    }

    async fn compute_instance_id(&self) -> Result<String> {
        self.instance_id().await
    }

    #[instrument(skip(self))]
    async fn create_volume_with_profile(
        &self,
        dataset_id: Uuid,
        size: u64,
        profile_name: Option<&str>,
    ) -> Result<BlockDeviceVolume> {
        OperationTimer::new("create_volume").finish(self.create(dataset_id, size, profile_name).await)
    }

    #[instrument(skip(self))]
    async fn destroy_volume(&self, blockdevice_id: &str) -> Result<()> {
        OperationTimer::new("destroy_volume").finish(self.destroy(blockdevice_id).await)
    }

    #[instrument(skip(self))]
    async fn attach_volume(
        &self,
        blockdevice_id: &str,
        attach_to: &str,
    ) -> Result<BlockDeviceVolume> {
        OperationTimer::new("attach_volume").finish(self.attach(blockdevice_id, attach_to).await)
    }

    #[instrument(skip(self))]
    async fn detach_volume(&self, blockdevice_id: &str) -> Result<()> {
        OperationTimer::new("detach_volume").finish(self.detach(blockdevice_id).await)
    }

    #[instrument(skip(self))]
    async fn list_volumes(&self) -> Result<Vec<BlockDeviceVolume>> {
        OperationTimer::new("list_volumes").finish(self.list().await)
    }

    #[instrument(skip(self))]
    async fn get_device_path(&self, blockdevice_id: &str) -> Result<PathBuf> {
        OperationTimer::new("get_device_path").finish(self.device_path(blockdevice_id).await)
    }
}
