mod credentials;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, ensure};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use rupgrade::config;
use rupgrade::model::{CredentialSet, ImageType, UpgradeRequest};
use rupgrade::probe::PingProber;
use rupgrade::sequencer::Upgrader;
use rupgrade::session::SshSessionFactory;
use rupgrade::templates::DeviceType;
use rupgrade::{pool, report};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageKind {
    /// ASA operating system image
    Asa,
    /// ASDM image
    Asdm,
}

impl From<ImageKind> for ImageType {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Asa => ImageType::Asa,
            ImageKind::Asdm => ImageType::Asdm,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "rupgrade",
    version,
    about = "Upload and activate ASA or ASDM images on a fleet of firewalls"
)]
struct Cli {
    /// CSV file with an "IP Address" column
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Where to write the result report
    #[arg(short = 'o', long, default_value = "upgrade_report.csv")]
    output: PathBuf,

    /// Kind of image being installed
    #[arg(short = 't', long, value_enum)]
    image_type: ImageKind,

    /// Local image file to upload
    #[arg(short = 'l', long)]
    image: PathBuf,

    /// Destination file system on the device
    #[arg(short = 'd', long, default_value = config::DEFAULT_DEST_DRIVE)]
    dest_drive: String,

    /// Reload each device after the boot image is set
    #[arg(short = 'r', long)]
    reboot: bool,

    /// Save the running configuration before uploading
    #[arg(short = 'b', long, requires = "backup_dir")]
    backup_config: bool,

    /// Existing directory for configuration backups
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Devices upgraded at the same time
    #[arg(short = 'w', long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,

    /// Device types to try, in order (cisco_asa, cisco_asa_balanced, cisco_asa_legacy)
    #[arg(long = "device-type")]
    device_types: Vec<String>,

    /// Seconds allowed for connecting and authenticating
    #[arg(long, default_value_t = config::DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,

    /// JSON credentials file; prompts interactively when absent
    #[arg(long, env = "RUPGRADE_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_level, cli.log_file.as_deref())?;

    ensure!(cli.image.is_file(), "image {} not found", cli.image.display());
    if let Some(dir) = &cli.backup_dir {
        ensure!(dir.is_dir(), "backup directory {} does not exist", dir.display());
    }
    let device_types = cli
        .device_types
        .iter()
        .map(|name| name.parse::<DeviceType>().map_err(|err| anyhow!(err.to_string())))
        .collect::<Result<Vec<_>>>()?;

    let credentials: Arc<[CredentialSet]> = credentials::load(cli.credentials.as_deref())?.into();
    let tasks = report::read_devices(&cli.input, credentials)?;
    if tasks.is_empty() {
        warn!("no devices found in {}", cli.input.display());
    }

    let mut request = UpgradeRequest::new(cli.image_type.into(), cli.image);
    request.dest_drive = cli.dest_drive;
    request.reboot = cli.reboot;
    request.backup_config = cli.backup_config;
    request.backup_dir = cli.backup_dir;
    request.workers = cli.workers;
    if !device_types.is_empty() {
        request.device_types = device_types;
    }
    request.connect_timeout = Some(Duration::from_secs(cli.connect_timeout));

    info!(
        "upgrading {} devices to {} ({} workers)",
        tasks.len(),
        request.remote_image_path(),
        request.workers
    );
    let workers = request.workers;
    let upgrader = Arc::new(Upgrader::new(
        SshSessionFactory::default(),
        PingProber,
        Arc::new(request),
    ));

    let started = Instant::now();
    let done = pool::run(
        tasks,
        workers,
        move |task| {
            let upgrader = upgrader.clone();
            async move { upgrader.upgrade(task).await }
        },
        |task, reason| task.aborted(&reason),
    )
    .await;

    report::write_report(&cli.output, &done)?;
    let failed = done.iter().filter(|device| device.has_error()).count();
    info!(
        "{} devices done in {:.0?}, {} with errors, report at {}",
        done.len(),
        started.elapsed(),
        failed,
        cli.output.display()
    );
    Ok(())
}
