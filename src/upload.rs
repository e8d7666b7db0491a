//! Image upload: SCP feature toggling, space check, transfer and verification.

use std::path::Path;

use log::{info, warn};

use crate::error::{ConnectError, UpgradeError};
use crate::model::{UpgradeStep, UploadOutcome, image_file_name};
use crate::session::{DeviceSession, FileTransfer};

/// Shows the SCP server line when it is configured.
pub const SCP_STATUS_COMMAND: &str = "show running-config | include ssh scopy enable";
pub const SCP_ENABLE: &str = "ssh scopy enable";
pub const SCP_DISABLE: &str = "no ssh scopy enable";

/// Copies `image` to `dest_drive` on the device at `address` and verifies it.
///
/// If the SCP server had to be switched on for the copy it is switched off
/// again afterwards, whatever happened in between.
pub async fn upload<S: DeviceSession>(
    session: &mut S,
    address: &str,
    image: &Path,
    dest_drive: &str,
) -> UploadOutcome {
    let mut outcome = UploadOutcome::default();

    let enabled = match scp_enabled(session).await {
        Ok(enabled) => enabled,
        Err(err) => {
            outcome.failure = Some(UpgradeError::StepFailed {
                step: UpgradeStep::CheckingTransferFeature,
                source: err,
            });
            return outcome;
        }
    };
    if !enabled {
        info!("{} enabling scp server for upload", address);
        if let Err(err) = session.apply_config(&[SCP_ENABLE.to_string()]).await {
            outcome.failure = Some(UpgradeError::StepFailed {
                step: UpgradeStep::CheckingTransferFeature,
                source: err,
            });
            return outcome;
        }
        outcome.feature_transiently_enabled = true;
    }

    if let Err(err) = transfer_image(session, address, image, dest_drive, &mut outcome).await {
        outcome.failure = Some(err);
    }

    if outcome.feature_transiently_enabled {
        match session.apply_config(&[SCP_DISABLE.to_string()]).await {
            Ok(_) => {
                info!("{} scp server disabled again", address);
                outcome.feature_restored = true;
            }
            Err(err) => warn!("{} failed to disable scp server after upload: {}", address, err),
        }
    } else {
        outcome.feature_restored = true;
    }

    outcome
}

async fn scp_enabled<S: DeviceSession>(session: &mut S) -> Result<bool, ConnectError> {
    let output = session.run_command(SCP_STATUS_COMMAND).await?;
    Ok(output
        .lines()
        .any(|line| line.trim() == SCP_ENABLE))
}

/// Runs the scoped part of the upload. The local image is closed when the
/// transfer handle drops at the end of this function.
async fn transfer_image<S: DeviceSession>(
    session: &mut S,
    address: &str,
    image: &Path,
    dest_drive: &str,
    outcome: &mut UploadOutcome,
) -> Result<(), UpgradeError> {
    let file_name = image_file_name(image);
    let mut transfer = FileTransfer::open(session, image, &file_name, dest_drive)
        .await
        .map_err(|err| UpgradeError::TransferFailed(err.to_string()))?;

    outcome.space_available = transfer
        .has_space()
        .await
        .map_err(|err| UpgradeError::TransferFailed(err.to_string()))?;
    if !outcome.space_available {
        return Err(UpgradeError::InsufficientSpace);
    }

    info!(
        "{} uploading {} ({} bytes)",
        address,
        transfer.dest_path(),
        transfer.size()
    );
    transfer
        .transfer()
        .await
        .map_err(|err| UpgradeError::TransferFailed(err.to_string()))?;
    outcome.transfer_completed = true;

    outcome.integrity_verified = transfer
        .verify()
        .await
        .map_err(|err| UpgradeError::TransferFailed(err.to_string()))?;
    if !outcome.integrity_verified {
        return Err(UpgradeError::IntegrityCheckFailed);
    }
    info!("{} {} verified", address, transfer.dest_path());
    Ok(())
}
