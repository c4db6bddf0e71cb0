//! Integration tests for the CloudByte block device driver
//!
//! The ElastiCenter controller is a wiremock server and iscsiadm is replaced
//! by a recording runner, so lifecycle operations run end to end without a
//! storage appliance or root privileges. Device links live in a temp dir.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

use cloudbyte_driver::platform::{CommandOutput, CommandRunner};
use cloudbyte_driver::{ALLOCATION_UNIT, BlockDeviceApi, CloudByteBlockDevice, DriverError, DriverConfig};
use elasticenter::ApiError;

const ADDRESS: &str = "10.0.0.5";
const IQN: &str = "iqn.2016-01.com.cloudbyte:acct-tsm1-vol1";

// ============================================================================
// Fixtures
// ============================================================================

type CallLog = Arc<Mutex<Vec<Vec<String>>>>;

/// Stands in for iscsiadm: records every call, answers discovery with a fixed
/// target list and, when asked to, creates the device link on login.
struct RecordingRunner {
    calls: CallLog,
    discovered: Vec<String>,
    link_on_login: Option<PathBuf>,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);

        let mut output = CommandOutput {
            success: true,
            ..Default::default()
        };
        if args.contains(&"discovery") {
            output.stdout = self
                .discovered
                .iter()
                .map(|iqn| format!("{}:3260,1 {}\n", ADDRESS, iqn))
                .collect();
        }
        if args.contains(&"--login")
            && let Some(link) = &self.link_on_login
        {
            std::fs::write(link, b"")?;
        }
        Ok(output)
    }
}

/// Controller, device tree and command log for one test.
///
/// The by-path links live in `<root>/disk/by-path`, so a udev-style
/// `../../<node>` link lands on `<root>/<node>`.
struct Harness {
    server: MockServer,
    devices: TempDir,
    calls: CallLog,
}

impl Harness {
    async fn start() -> Self {
        let devices = TempDir::new().unwrap();
        std::fs::create_dir_all(devices.path().join("disk").join("by-path")).unwrap();
        Self {
            server: MockServer::start().await,
            devices,
            calls: CallLog::default(),
        }
    }

    fn by_path_dir(&self) -> PathBuf {
        self.devices.path().join("disk").join("by-path")
    }

    fn config(&self) -> DriverConfig {
        serde_json::from_value(json!({
            "vsm_name": "tsm1",
            "account_name": "acct",
            "apikey": "test-key",
            "elasticenter_ip": self.server.uri(),
            "confirm_volume_create_retries": 3,
            "confirm_volume_create_retry_interval": 0,
            "confirm_volume_delete_retries": 3,
            "confirm_volume_delete_retry_interval": 0,
            "instance_id": "10.9.9.9",
            "iscsi": {
                "by_path_dir": self.by_path_dir(),
                "probe_interval_ms": 1,
                "use_sudo": false
            }
        }))
        .unwrap()
    }

    fn driver(&self, discovered: &[&str], link_on_login: bool) -> CloudByteBlockDevice<RecordingRunner> {
        let runner = RecordingRunner {
            calls: self.calls.clone(),
            discovered: discovered.iter().map(|s| s.to_string()).collect(),
            link_on_login: link_on_login.then(|| self.device_link()),
        };
        CloudByteBlockDevice::with_runner(self.config(), runner).unwrap()
    }

    fn device_link(&self) -> PathBuf {
        self.by_path_dir()
            .join(format!("ip-{}:3260-iscsi-{}-lun-0", ADDRESS, IQN))
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    async fn mount(&self, mock: Mock) {
        mock.mount(&self.server).await;
    }

    async fn mount_account_and_tenant(&self) {
        self.mount(ok(
            api("listAccount"),
            json!({"listAccountResponse": {"account": [{"id": "a1", "name": "acct"}]}}),
        ))
        .await;
        self.mount(ok(
            api("listTsm").and(query_param("accountid", "a1")),
            json!({"listTsmResponse": {"listTsm": [
                {"id": "t1", "name": "tsm1", "datasetid": "q1"}
            ]}}),
        ))
        .await;
    }

    async fn mount_iscsi_records(&self, groups: Value) {
        self.mount(ok(
            api("listVolumeiSCSIService").and(query_param("storageid", "v1")),
            json!({"listVolumeiSCSIServiceResponse": {"iSCSIService": [
                {"id": "svc1", "volume_id": "v1"}
            ]}}),
        ))
        .await;
        self.mount(ok(
            api("listiSCSIInitiator").and(query_param("accountid", "a1")),
            json!({"listInitiatorsResponse": {"initiator": groups}}),
        ))
        .await;
    }
}

fn api(command: &str) -> MockBuilder {
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", command))
        .and(query_param("apiKey", "test-key"))
}

fn ok(builder: MockBuilder, body: Value) -> Mock {
    builder.respond_with(ResponseTemplate::new(200).set_body_json(body))
}

fn remote_volume(id: &str, name: &str, tenant: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "Tsmid": tenant,
        "ipaddress": ADDRESS,
        "iqnname": IQN,
        "currentTotalSpace": "5120"
    })
}

fn filesystems(volumes: Vec<Value>) -> Value {
    json!({"listFilesystemResponse": {"filesystem": volumes}})
}

fn job(status: u64, result: Value) -> Value {
    json!({"queryasyncjobresultresponse": {"jobstatus": status, "jobresult": result}})
}

fn is_login(call: &[String]) -> bool {
    call.iter().any(|a| a == "--login")
}

fn touch(path: &Path) {
    std::fs::write(path, b"").unwrap();
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_volume_full_workflow() {
    let h = Harness::start().await;
    let dataset_id = Uuid::new_v4();
    let name = dataset_id.to_string();

    h.mount_account_and_tenant().await;
    h.mount(
        ok(
            api("addQosGroup")
                .and(query_param("name", format!("QoS_{}", name)))
                .and(query_param("tsmid", "t1"))
                .and(query_param("iops", "100")),
            json!({"addqosgroupresponse": {"qosgroup": {"id": "qos1"}}}),
        )
        .expect(1),
    )
    .await;
    h.mount(
        ok(
            api("createVolume")
                .and(query_param("quotasize", "5G"))
                .and(query_param("name", name.as_str()))
                .and(query_param("qosgroupid", "qos1"))
                .and(query_param("datasetid", "q1"))
                .and(query_param("tsmid", "t1"))
                .and(query_param("protocoltype", "ISCSI")),
            json!({"createvolumeresponse": {"jobid": "job1"}}),
        )
        .expect(1),
    )
    .await;
    h.mount(
        ok(
            api("queryAsyncJobResult").and(query_param("jobId", "job1")),
            job(1, json!({"storage": {"id": "v1"}})),
        )
        .expect(1),
    )
    .await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &name, "t1")]),
    ))
    .await;
    h.mount_iscsi_records(json!([{"id": "ig-all", "initiatorgroup": "ALL"}]))
        .await;
    h.mount(
        ok(
            api("updateVolumeiSCSIService")
                .and(query_param("id", "svc1"))
                .and(query_param("igid", "ig-all")),
            json!({"updatevolumeiscsiserviceresponse": {}}),
        )
        .expect(1),
    )
    .await;

    let driver = h.driver(&[], false);
    let volume = driver
        .create_volume(dataset_id, 5_368_709_120)
        .await
        .unwrap();

    assert_eq!(volume.blockdevice_id, "v1");
    assert_eq!(volume.size, 5_368_709_120);
    assert_eq!(volume.attached_to, None);
    assert_eq!(volume.dataset_id, dataset_id);
    assert_eq!(volume.size % driver.allocation_unit(), 0);
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_create_with_profile_overrides_iops() {
    let h = Harness::start().await;
    let dataset_id = Uuid::new_v4();

    h.mount_account_and_tenant().await;
    h.mount(
        ok(
            api("addQosGroup").and(query_param("iops", "500")),
            json!({"addqosgroupresponse": {"qosgroup": {"id": "qos1"}}}),
        )
        .expect(1),
    )
    .await;
    // Stop the workflow right after the QoS step
    h.mount(
        api("createVolume")
            .respond_with(ResponseTemplate::new(530).set_body_json(json!({
                "createvolumeresponse": {"errorcode": 530, "errortext": "quota exceeded"}
            })))
            .expect(1),
    )
    .await;

    let err = h
        .driver(&[], false)
        .create_volume_with_profile(dataset_id, 2 * ALLOCATION_UNIT, Some("silver"))
        .await
        .unwrap_err();

    match err {
        DriverError::Api(ApiError::Remote {
            command,
            status,
            message,
            ..
        }) => {
            assert_eq!(command, "createVolume");
            assert_eq!(status, 530);
            assert_eq!(message, "quota exceeded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_create_with_unknown_profile_makes_no_calls() {
    let h = Harness::start().await;
    h.mount(
        Mock::given(path("/client/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0),
    )
    .await;

    let err = h
        .driver(&[], false)
        .create_volume_with_profile(Uuid::new_v4(), ALLOCATION_UNIT, Some("platinum"))
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Configuration(msg) if msg.contains("platinum")));
}

#[tokio::test]
async fn test_create_job_failure_stops_before_authorization() {
    let h = Harness::start().await;

    h.mount_account_and_tenant().await;
    h.mount(ok(
        api("addQosGroup"),
        json!({"addqosgroupresponse": {"qosgroup": {"id": "qos1"}}}),
    ))
    .await;
    h.mount(ok(
        api("createVolume"),
        json!({"createvolumeresponse": {"jobid": "job1"}}),
    ))
    .await;
    h.mount(
        ok(
            api("queryAsyncJobResult"),
            job(2, json!({"errorcode": "503", "errortext": "pool offline"})),
        )
        .expect(1),
    )
    .await;
    h.mount(ok(api("updateVolumeiSCSIService"), json!({})).expect(0))
        .await;

    let err = h
        .driver(&[], false)
        .create_volume(Uuid::new_v4(), ALLOCATION_UNIT)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DriverError::Api(ApiError::OperationFailed { ref code, ref text, .. })
            if code == "503" && text == "pool offline"
    ));
}

// ============================================================================
// Destroy
// ============================================================================

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let h = Harness::start().await;
    let name = Uuid::new_v4().to_string();

    h.mount(
        ok(
            api("listFileSystem"),
            filesystems(vec![remote_volume("v1", &name, "t1")]),
        )
        .up_to_n_times(1),
    )
    .await;
    h.mount(ok(api("listFileSystem"), filesystems(vec![]))).await;
    h.mount_account_and_tenant().await;
    h.mount_iscsi_records(json!([
        {"id": "ig-all", "initiatorgroup": "ALL"},
        {"id": "ig-none", "initiatorgroup": "None"}
    ]))
    .await;
    h.mount(
        ok(
            api("updateVolumeiSCSIService")
                .and(query_param("id", "svc1"))
                .and(query_param("igid", "ig-none")),
            json!({}),
        )
        .expect(1),
    )
    .await;
    h.mount(
        ok(
            api("deleteFileSystem").and(query_param("id", "v1")),
            json!({"deleteFileSystemResponse": {"jobid": "job2"}}),
        )
        .expect(1),
    )
    .await;
    h.mount(
        ok(
            api("queryAsyncJobResult").and(query_param("jobId", "job2")),
            job(1, json!({})),
        )
        .expect(1),
    )
    .await;

    let driver = h.driver(&[], false);
    driver.destroy_volume("v1").await.unwrap();
    driver.destroy_volume("v1").await.unwrap();
}

#[tokio::test]
async fn test_destroy_without_none_group_still_deletes() {
    let h = Harness::start().await;
    let name = Uuid::new_v4().to_string();

    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &name, "t1")]),
    ))
    .await;
    h.mount_account_and_tenant().await;
    h.mount_iscsi_records(json!([{"id": "ig-all", "initiatorgroup": "ALL"}]))
        .await;
    h.mount(ok(api("updateVolumeiSCSIService"), json!({})).expect(0))
        .await;
    h.mount(
        ok(
            api("deleteFileSystem"),
            json!({"deleteFileSystemResponse": {"jobid": "job2"}}),
        )
        .expect(1),
    )
    .await;
    h.mount(ok(api("queryAsyncJobResult"), job(1, json!({})))).await;

    h.driver(&[], false).destroy_volume("v1").await.unwrap();
}

#[tokio::test]
async fn test_destroy_times_out_while_pending() {
    let h = Harness::start().await;
    let name = Uuid::new_v4().to_string();

    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &name, "t1")]),
    ))
    .await;
    h.mount_account_and_tenant().await;
    h.mount_iscsi_records(json!([{"id": "ig-none", "initiatorgroup": "None"}]))
        .await;
    h.mount(ok(api("updateVolumeiSCSIService"), json!({}))).await;
    h.mount(ok(
        api("deleteFileSystem"),
        json!({"deleteFileSystemResponse": {"jobid": "job2"}}),
    ))
    .await;
    h.mount(ok(api("queryAsyncJobResult"), job(0, Value::Null)).expect(3))
        .await;

    let err = h.driver(&[], false).destroy_volume("v1").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Api(ApiError::Timeout { attempts: 3, .. })
    ));
}

// ============================================================================
// List
// ============================================================================

#[tokio::test]
async fn test_list_filters_by_tenant() {
    let h = Harness::start().await;
    let mine = Uuid::new_v4();
    let theirs = Uuid::new_v4();

    h.mount_account_and_tenant().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![
            remote_volume("v1", &mine.to_string(), "t1"),
            remote_volume("v2", &theirs.to_string(), "t2"),
        ]),
    ))
    .await;

    let driver = h.driver(&[], false);

    let volumes = driver.list_volumes().await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].blockdevice_id, "v1");
    assert_eq!(volumes[0].dataset_id, mine);
    assert_eq!(volumes[0].size, 5 * ALLOCATION_UNIT);
    assert_eq!(volumes[0].attached_to, None);

    touch(&h.device_link());
    let volumes = driver.list_volumes().await.unwrap();
    assert_eq!(volumes[0].attached_to.as_deref(), Some("10.9.9.9"));
}

#[tokio::test]
async fn test_list_skips_foreign_names() {
    let h = Harness::start().await;

    h.mount_account_and_tenant().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v9", "manual-volume", "t1")]),
    ))
    .await;

    assert!(h.driver(&[], false).list_volumes().await.unwrap().is_empty());
}

// ============================================================================
// Attach / Detach
// ============================================================================

#[tokio::test]
async fn test_attach_fails_when_target_not_discovered() {
    let h = Harness::start().await;
    let name = Uuid::new_v4().to_string();
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &name, "t1")]),
    ))
    .await;

    let err = h
        .driver(&["iqn.2016-01.com.cloudbyte:acct-tsm1-other"], true)
        .attach_volume("v1", "h1")
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::TargetNotDiscovered { ref target, .. } if target == IQN));
    let calls = h.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains(&"discovery".to_string()));
    assert!(!calls.iter().any(|c| is_login(c)));
}

#[tokio::test]
async fn test_attach_discovers_and_logs_in() {
    let h = Harness::start().await;
    let dataset_id = Uuid::new_v4();
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &dataset_id.to_string(), "t1")]),
    ))
    .await;

    let volume = h
        .driver(&[IQN], true)
        .attach_volume("v1", "h1")
        .await
        .unwrap();

    assert_eq!(volume.attached_to.as_deref(), Some("h1"));
    assert_eq!(volume.dataset_id, dataset_id);
    assert_eq!(volume.size, 5 * ALLOCATION_UNIT);
    assert_eq!(
        h.calls(),
        vec![
            vec!["iscsiadm", "-m", "discovery", "-t", "sendtargets", "-p", ADDRESS],
            vec!["iscsiadm", "-m", "node", "-p", ADDRESS, "-T", IQN, "--login"],
        ]
    );
}

#[tokio::test]
async fn test_attach_when_already_attached_skips_login() {
    let h = Harness::start().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &Uuid::new_v4().to_string(), "t1")]),
    ))
    .await;
    touch(&h.device_link());

    let volume = h
        .driver(&[], false)
        .attach_volume("v1", "h1")
        .await
        .unwrap();
    assert_eq!(volume.attached_to.as_deref(), Some("h1"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_attach_unknown_volume() {
    let h = Harness::start().await;
    h.mount(ok(api("listFileSystem"), filesystems(vec![]))).await;

    let err = h
        .driver(&[IQN], true)
        .attach_volume("v404", "h1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::Api(ApiError::NotFound { kind: "volume", .. })
    ));
}

#[tokio::test]
async fn test_detach_not_attached() {
    let h = Harness::start().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &Uuid::new_v4().to_string(), "t1")]),
    ))
    .await;

    let err = h.driver(&[], false).detach_volume("v1").await.unwrap_err();
    assert!(matches!(err, DriverError::NotAttached(ref id) if id == "v1"));
    assert!(h.calls().is_empty());
}

#[tokio::test]
async fn test_detach_logs_out() {
    let h = Harness::start().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &Uuid::new_v4().to_string(), "t1")]),
    ))
    .await;
    touch(&h.device_link());

    h.driver(&[], false).detach_volume("v1").await.unwrap();
    assert_eq!(
        h.calls(),
        vec![
            vec!["iscsiadm", "-m", "node", "-p", ADDRESS, "-T", IQN, "-u"],
            vec!["iscsiadm", "-m", "node", "-o", "delete", "-T", IQN],
        ]
    );
}

// ============================================================================
// Device path
// ============================================================================

#[tokio::test]
async fn test_get_device_path_follows_link() {
    let h = Harness::start().await;
    h.mount(ok(
        api("listFileSystem"),
        filesystems(vec![remote_volume("v1", &Uuid::new_v4().to_string(), "t1")]),
    ))
    .await;
    let driver = h.driver(&[], false);

    assert!(matches!(
        driver.get_device_path("v1").await,
        Err(DriverError::Session(_))
    ));

    // Dangling links count as detached
    std::os::unix::fs::symlink("../../cloudbyte-test-sdzz", h.device_link()).unwrap();
    assert!(matches!(
        driver.get_device_path("v1").await,
        Err(DriverError::Session(_))
    ));

    touch(&h.devices.path().join("cloudbyte-test-sdzz"));
    assert_eq!(
        driver.get_device_path("v1").await.unwrap(),
        PathBuf::from("/dev/cloudbyte-test-sdzz")
    );
}
