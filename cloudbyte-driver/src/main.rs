//! CloudByte Block Device Driver
//!
//! Command-line host for the driver: each invocation runs one lifecycle
//! operation against the configured ElastiCenter controller and prints the
//! result as JSON.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use cloudbyte_driver::{BlockDeviceApi, CloudByteBlockDevice, DriverConfig, metrics};

/// CLI arguments for the driver
#[derive(Parser, Debug)]
#[command(name = "cloudbyte-driver")]
#[command(about = "CloudByte ElastiCenter block device driver")]
struct Args {
    /// Driver configuration file (JSON)
    #[arg(long, env = "CLOUDBYTE_CONFIG", default_value = "/etc/cloudbyte/driver.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9091)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a volume for a dataset
    Create {
        #[arg(long)]
        dataset_id: Uuid,
        /// Size in bytes (rounded down to whole GiB)
        #[arg(long)]
        size: u64,
        /// Performance profile name
        #[arg(long)]
        profile: Option<String>,
    },
    /// Delete a volume (succeeds if already gone)
    Destroy { blockdevice_id: String },
    /// Log in to a volume's iSCSI target
    Attach {
        blockdevice_id: String,
        /// Host identifier to report (defaults to this host's instance id)
        #[arg(long)]
        host: Option<String>,
    },
    /// Log out of a volume's iSCSI target
    Detach { blockdevice_id: String },
    /// List volumes in the configured tenant
    List,
    /// Print the device node of an attached volume
    DevicePath { blockdevice_id: String },
    /// Print this host's instance id
    InstanceId,
    /// Print the allocation unit in bytes
    AllocationUnit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries results
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    info!(config = %args.config.display(), "Loading driver configuration");
    let config = DriverConfig::load(&args.config).await?;
    let driver = CloudByteBlockDevice::new(config)?;

    if let Err(e) = run(&driver, args.command).await {
        error!(error = %e, "Operation failed");
        return Err(e);
    }
    Ok(())
}

async fn run(
    driver: &impl BlockDeviceApi,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = match command {
        Command::Create {
            dataset_id,
            size,
            profile,
        } => serde_json::to_value(
            driver
                .create_volume_with_profile(dataset_id, size, profile.as_deref())
                .await?,
        )?,
        Command::Destroy { blockdevice_id } => {
            driver.destroy_volume(&blockdevice_id).await?;
            serde_json::json!({ "destroyed": blockdevice_id })
        }
        Command::Attach {
            blockdevice_id,
            host,
        } => {
            let host = match host {
                Some(host) => host,
                None => driver.compute_instance_id().await?,
            };
            serde_json::to_value(driver.attach_volume(&blockdevice_id, &host).await?)?
        }
        Command::Detach { blockdevice_id } => {
            driver.detach_volume(&blockdevice_id).await?;
            serde_json::json!({ "detached": blockdevice_id })
        }
        Command::List => serde_json::to_value(driver.list_volumes().await?)?,
        Command::DevicePath { blockdevice_id } => {
            serde_json::to_value(driver.get_device_path(&blockdevice_id).await?)?
        }
        Command::InstanceId => serde_json::Value::String(driver.compute_instance_id().await?),
        Command::AllocationUnit => serde_json::Value::from(driver.allocation_unit()),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
