//! Records that flow through an upgrade run.
//!
//! A [`DeviceTask`] is created per target address, moved into exactly one worker,
//! mutated by the sequencer and handed back finalized. The [`UpgradeRequest`] is
//! shared read-only by every worker for the whole run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::templates::DeviceType;

/// One username/password/secret combination.
///
/// An ordered list of these is a fallback chain: the first set that
/// authenticates is kept for the rest of the session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub username: String,
    pub password: String,
    /// Enable secret. When absent the device's enable prompt gets an empty line.
    #[serde(default)]
    pub secret: Option<String>,
}

impl CredentialSet {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("username", &self.username)
            .field("password", &"***")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Kind of image being installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Operating system image, activated through `boot system`.
    Asa,
    /// Management console (ASDM) image, activated through `asdm image`.
    Asdm,
}

impl ImageType {
    /// Configuration line pointing the device at `image_path`.
    pub fn boot_command(&self, image_path: &str) -> String {
        match self {
            ImageType::Asa => format!("boot system {image_path}"),
            ImageType::Asdm => format!("asdm image {image_path}"),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Asa => f.write_str("asa"),
            ImageType::Asdm => f.write_str("asdm"),
        }
    }
}

/// Steps of the per-device upgrade sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStep {
    Connecting,
    BackingUp,
    CheckingTransferFeature,
    Uploading,
    SettingBootImage,
    SavingConfig,
    Rebooting,
    HealthChecking,
    Done,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeStep::Connecting => "connecting",
            UpgradeStep::BackingUp => "backing up",
            UpgradeStep::CheckingTransferFeature => "checking transfer feature",
            UpgradeStep::Uploading => "uploading",
            UpgradeStep::SettingBootImage => "setting boot image",
            UpgradeStep::SavingConfig => "saving config",
            UpgradeStep::Rebooting => "rebooting",
            UpgradeStep::HealthChecking => "health checking",
            UpgradeStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-device record threaded through the upgrade sequence.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceTask {
    pub address: String,
    /// Hostname taken from the device prompt, empty until connected.
    pub name: String,
    pub connected: bool,
    pub successfully_rebooted: bool,
    pub file_uploaded: bool,
    pub config_backed_up: bool,
    /// Last error message, empty when nothing went wrong.
    pub error: String,
    /// Step the sequence halted on, if it halted.
    pub failed_step: Option<UpgradeStep>,
    #[serde(skip)]
    pub credentials: Arc<[CredentialSet]>,
}

impl DeviceTask {
    pub fn new(address: impl Into<String>, credentials: Arc<[CredentialSet]>) -> Self {
        Self {
            address: address.into(),
            name: String::new(),
            connected: false,
            successfully_rebooted: false,
            file_uploaded: false,
            config_backed_up: false,
            error: String::new(),
            failed_step: None,
            credentials,
        }
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Marks a task whose upgrade never returned, keeping the device in the report.
    pub fn aborted(mut self, reason: &str) -> Self {
        self.error = format!("upgrade aborted: {reason}");
        self
    }
}

/// Run-wide upgrade settings, shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub image_type: ImageType,
    pub image_path: PathBuf,
    /// Destination file system prefix, e.g. `disk0:/`. The uploaded path is
    /// this prefix followed directly by the image file name.
    pub dest_drive: String,
    pub reboot: bool,
    pub backup_config: bool,
    pub backup_dir: Option<PathBuf>,
    pub workers: usize,
    /// Device types tried, in order, for every credential set.
    pub device_types: Vec<DeviceType>,
    pub connect_timeout: Option<Duration>,
    /// Wait between issuing reload and probing the device.
    pub settle_interval: Duration,
    pub probe_attempts: u32,
}

impl UpgradeRequest {
    pub fn new(image_type: ImageType, image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_type,
            image_path: image_path.into(),
            dest_drive: config::DEFAULT_DEST_DRIVE.to_string(),
            reboot: false,
            backup_config: false,
            backup_dir: None,
            workers: config::DEFAULT_WORKERS,
            device_types: vec![DeviceType::CiscoAsa],
            connect_timeout: Some(config::DEFAULT_CONNECT_TIMEOUT),
            settle_interval: config::REBOOT_SETTLE_INTERVAL,
            probe_attempts: config::DEFAULT_PING_COUNT,
        }
    }

    /// File name the image is stored under on the device.
    pub fn image_file_name(&self) -> String {
        image_file_name(&self.image_path)
    }

    /// Full device-side path of the uploaded image.
    pub fn remote_image_path(&self) -> String {
        format!("{}{}", self.dest_drive, self.image_file_name())
    }
}

/// Base name of a local image path.
pub fn image_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Result of one upload attempt; folded into the device task by the sequencer.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub space_available: bool,
    pub transfer_completed: bool,
    pub integrity_verified: bool,
    /// The transfer feature was off and had to be switched on for this upload.
    pub feature_transiently_enabled: bool,
    /// The transfer feature is back in its original state.
    pub feature_restored: bool,
    pub failure: Option<crate::error::UpgradeError>,
}

impl UploadOutcome {
    /// True only when the image is on the device and verified.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && self.space_available
            && self.transfer_completed
            && self.integrity_verified
    }

    /// Terminal verdict of the upload step.
    pub fn verdict(self) -> Result<(), crate::error::UpgradeError> {
        use crate::error::UpgradeError;

    #[test]
    fn aborted_task_keeps_its_address_and_reports_the_reason() {
        let task = DeviceTask::new("10.0.0.9", Arc::from(Vec::new())).aborted("task 7 panicked");
        assert_eq!(task.address, "10.0.0.9");
        assert!(task.has_error());
        assert_eq!(task.error, "upgrade aborted: task 7 panicked");
    }

        if let Some(failure) = self.failure {
            return Err(failure);
        }
        if !self.space_available {
            return Err(UpgradeError::InsufficientSpace);
        }
        if !self.transfer_completed {
            return Err(UpgradeError::TransferFailed("transfer did not complete".into()));
        }
        if !self.integrity_verified {
            return Err(UpgradeError::IntegrityCheckFailed);
        }
        Ok(())
    }
}
