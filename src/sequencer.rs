//! Per-device upgrade sequence.
//!
//! ```text
//! Connecting -> BackingUp? -> CheckingTransferFeature -> Uploading
//!     -> SettingBootImage -> SavingConfig -> Rebooting? -> HealthChecking? -> Done
//! ```
//!
//! A step runs only when every step before it succeeded. The first failure is
//! recorded on the [`DeviceTask`] together with the step it happened in.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backup::write_backup;
use crate::connector;
use crate::error::UpgradeError;
use crate::model::{DeviceTask, UpgradeRequest, UpgradeStep};
use crate::probe::Prober;
use crate::session::{DeviceSession, SessionFactory};
use crate::upload::upload;

pub const NOT_RESPONSIVE: &str = "device not responsive after reboot";

/// Runs the upgrade sequence against single devices.
pub struct Upgrader<F, P> {
    factory: F,
    prober: P,
    request: Arc<UpgradeRequest>,
}

impl<F: SessionFactory, P: Prober> Upgrader<F, P> {
    pub fn new(factory: F, prober: P, request: Arc<UpgradeRequest>) -> Self {
        Self {
            factory,
            prober,
            request,
        }
    }

    /// Upgrades one device and returns its finalized record. Never fails: all
    /// errors end up in `task.error`.
    pub async fn upgrade(&self, mut task: DeviceTask) -> DeviceTask {
        let request = &self.request;
        let mut session = match connector::connect(
            &self.factory,
            &task.address,
            &task.credentials,
            true,
            &request.device_types,
            request.connect_timeout,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => {
                record_failure(&mut task, err);
                return task;
            }
        };
        task.connected = true;
        task.name = device_name_from_prompt(session.prompt());
        info!("{} connected ({})", task.address, task.name);

        if let Err(err) = self.install_image(&mut session, &mut task).await {
            session.close().await;
            record_failure(&mut task, err);
            return task;
        }

        if !request.reboot {
            session.close().await;
            info!("{} upgrade staged, reload not requested", task.address);
            return task;
        }

        info!("{} reloading", task.address);
        let reload = session.reload().await;
        session.close().await;
        if let Err(source) = reload {
            record_failure(
                &mut task,
                UpgradeError::StepFailed {
                    step: UpgradeStep::Rebooting,
                    source,
                },
            );
            return task;
        }

        debug!(
            "{} waiting {:?} for the device to come back",
            task.address, request.settle_interval
        );
        tokio::time::sleep(request.settle_interval).await;

        task.successfully_rebooted = self
            .prober
            .is_reachable(&task.address, request.probe_attempts)
            .await;
        if task.successfully_rebooted {
            info!("{} back online", task.address);
        } else {
            warn!("{} {}", task.address, NOT_RESPONSIVE);
            task.error = NOT_RESPONSIVE.to_string();
            task.failed_step = Some(UpgradeStep::HealthChecking);
        }
        task
    }

    /// Backup, upload, boot pointer and save. Everything up to the reload.
    async fn install_image(
        &self,
        session: &mut F::Session,
        task: &mut DeviceTask,
    ) -> Result<(), UpgradeError> {
        let request = &self.request;

        if request.backup_config {
            let dir = request
                .backup_dir
                .as_deref()
                .ok_or_else(|| UpgradeError::BackupFailed("no backup directory given".into()))?;
            let running = session
                .run_command("show running-config")
                .await
                .map_err(|err| UpgradeError::BackupFailed(err.to_string()))?;
            let path = write_backup(dir, &task.name, &running).await?;
            task.config_backed_up = true;
            info!("{} config backed up to {}", task.address, path.display());
        }

        upload(session, &task.address, &request.image_path, &request.dest_drive)
            .await
            .verdict()?;
        task.file_uploaded = true;

        let boot = request
            .image_type
            .boot_command(&request.remote_image_path());
        debug!("{} {}", task.address, boot);
        session
            .apply_config(&[boot])
            .await
            .map_err(|source| UpgradeError::StepFailed {
                step: UpgradeStep::SettingBootImage,
                source,
            })?;

        session
            .save_config()
            .await
            .map_err(|source| UpgradeError::StepFailed {
                step: UpgradeStep::SavingConfig,
                source,
            })?;
        info!("{} boot image set to {}", task.address, request.remote_image_path());
        Ok(())
    }
}

fn record_failure(task: &mut DeviceTask, err: UpgradeError) {
    error!("{} {}", task.address, err);
    task.failed_step = Some(err.step());
    task.error = err.to_string();
}

/// `fw-edge-01# ` -> `fw-edge-01`
pub fn device_name_from_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim_end();
    trimmed
        .strip_suffix(['#', '>'])
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::model::{CredentialSet, ImageType};
    use crate::testing::{DeviceScript, MockFactory, MockProber};

    struct Fixture {
        _dir: tempfile::TempDir,
        image: PathBuf,
        backups: PathBuf,
    }

    fn fixture(image_name: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join(image_name);
        std::fs::write(&image, b"image contents").expect("write image");
        let backups = dir.path().join("backups");
        std::fs::create_dir(&backups).expect("backup dir");
        Fixture {
            _dir: dir,
            image,
            backups,
        }
    }

    fn request(fixture: &Fixture) -> UpgradeRequest {
        let mut request = UpgradeRequest::new(ImageType::Asa, &fixture.image);
        request.settle_interval = Duration::ZERO;
        request
    }

    fn task(address: &str) -> DeviceTask {
        DeviceTask::new(address, Arc::from(vec![CredentialSet::new("admin", "pw")]))
    }

    #[tokio::test]
    async fn staged_upgrade_without_reload() {
        let fixture = fixture("asa9-20-2-smp-k8.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw-edge-01# "));
        let state = factory.state("10.0.0.1");
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request(&fixture)));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.connected);
        assert_eq!(done.name, "fw-edge-01");
        assert!(done.file_uploaded);
        assert!(!done.successfully_rebooted);
        assert!(!done.has_error());
        assert_eq!(done.failed_step, None);
        let state = state.lock().expect("state");
        assert_eq!(
            state.config_lines,
            vec!["boot system disk0:/asa9-20-2-smp-k8.bin"]
        );
        assert!(state.saved);
        assert!(!state.reloaded);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn asdm_image_sets_asdm_pointer() {
        let fixture = fixture("asdm-7201.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let state = factory.state("10.0.0.1");
        let mut request = request(&fixture);
        request.image_type = ImageType::Asdm;
        request.dest_drive = "flash:/".to_string();
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(!done.has_error(), "{}", done.error);
        assert_eq!(
            state.lock().expect("state").config_lines,
            vec!["asdm image flash:/asdm-7201.bin"]
        );
    }

    #[tokio::test]
    async fn reboot_with_unreachable_device_is_reported_not_fatal() {
        let fixture = fixture("asa.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let state = factory.state("10.0.0.1");
        let mut request = request(&fixture);
        request.reboot = true;
        let upgrader = Upgrader::new(factory, MockProber::answering(false), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.connected);
        assert!(done.file_uploaded);
        assert!(!done.successfully_rebooted);
        assert_eq!(done.error, NOT_RESPONSIVE);
        assert_eq!(done.failed_step, Some(UpgradeStep::HealthChecking));
        let state = state.lock().expect("state");
        assert!(state.reloaded);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn reboot_with_reachable_device_succeeds() {
        let fixture = fixture("asa.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let mut request = request(&fixture);
        request.reboot = true;
        request.probe_attempts = 2;
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.successfully_rebooted);
        assert!(!done.has_error());
        assert_eq!(upgrader.prober.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_interval_elapses_before_probe() {
        let fixture = fixture("asa.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let mut request = UpgradeRequest::new(ImageType::Asa, &fixture.image);
        request.reboot = true;
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let started = tokio::time::Instant::now();
        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.successfully_rebooted);
        assert!(started.elapsed() >= crate::config::REBOOT_SETTLE_INTERVAL);
    }

    #[tokio::test]
    async fn failed_reload_skips_health_check() {
        let fixture = fixture("asa.bin");
        let mut script = DeviceScript::healthy("fw1#");
        script.reload_fails = true;
        let factory = MockFactory::new().with_device("10.0.0.1", script);
        let mut request = request(&fixture);
        request.reboot = true;
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.file_uploaded);
        assert_eq!(done.failed_step, Some(UpgradeStep::Rebooting));
        assert!(!done.successfully_rebooted);
        assert_eq!(upgrader.prober.calls(), 0);
    }

    #[tokio::test]
    async fn upload_failure_never_sets_boot_pointer() {
        let fixture = fixture("asa.bin");
        let mut script = DeviceScript::healthy("fw1#");
        script.corrupt_upload = true;
        let factory = MockFactory::new().with_device("10.0.0.1", script);
        let state = factory.state("10.0.0.1");
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request(&fixture)));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(!done.file_uploaded);
        assert_eq!(done.failed_step, Some(UpgradeStep::Uploading));
        assert_eq!(done.error, "file transfer verification failed");
        let state = state.lock().expect("state");
        assert!(state.config_lines.is_empty());
        assert!(!state.saved);
        assert!(state.closed);
    }

    #[tokio::test]
    async fn backup_written_before_upload() {
        let fixture = fixture("asa.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let mut request = request(&fixture);
        request.backup_config = true;
        request.backup_dir = Some(fixture.backups.clone());
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.config_backed_up);
        assert!(done.file_uploaded);
        let files: Vec<_> = std::fs::read_dir(&fixture.backups)
            .expect("read backups")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("fw1_"));
    }

    #[tokio::test]
    async fn backup_failure_halts_before_upload() {
        let fixture = fixture("asa.bin");
        let factory = MockFactory::new().with_device("10.0.0.1", DeviceScript::healthy("fw1#"));
        let state = factory.state("10.0.0.1");
        let mut request = request(&fixture);
        request.backup_config = true;
        request.backup_dir = Some(fixture.backups.join("missing"));
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(!done.config_backed_up);
        assert!(!done.file_uploaded);
        assert_eq!(done.failed_step, Some(UpgradeStep::BackingUp));
        assert!(state.lock().expect("state").transfers.is_empty());
    }

    #[tokio::test]
    async fn save_failure_is_reported_with_its_step() {
        let fixture = fixture("asa.bin");
        let mut script = DeviceScript::healthy("fw1#");
        script.save_fails = true;
        let factory = MockFactory::new().with_device("10.0.0.1", script);
        let upgrader = Upgrader::new(factory, MockProber::answering(true), Arc::new(request(&fixture)));

        let done = upgrader.upgrade(task("10.0.0.1")).await;

        assert!(done.file_uploaded);
        assert_eq!(done.failed_step, Some(UpgradeStep::SavingConfig));
        assert!(done.error.starts_with("saving config failed"));
    }

    #[tokio::test]
    async fn unreachable_device_is_never_marked_connected() {
        let fixture = fixture("asa.bin");
        let upgrader = Upgrader::new(
            MockFactory::new(),
            MockProber::answering(true),
            Arc::new(request(&fixture)),
        );

        let done = upgrader.upgrade(task("10.0.0.99")).await;

        assert!(!done.connected);
        assert!(done.name.is_empty());
        assert_eq!(done.failed_step, Some(UpgradeStep::Connecting));
        assert!(done.error.starts_with("unable to connect to device"));
    }

    #[test]
    fn prompt_delimiter_stripped_from_name() {
        assert_eq!(device_name_from_prompt("fw-edge-01#"), "fw-edge-01");
        assert_eq!(device_name_from_prompt("fw-edge-01> \r\n"), "fw-edge-01");
        assert_eq!(device_name_from_prompt("fw-edge-01##"), "fw-edge-01#");
        assert_eq!(device_name_from_prompt("fw-edge-01"), "fw-edge-01");
    }
}
