use std::path::{Path, PathBuf};

use chrono::Local;
use log::debug;

use crate::error::UpgradeError;

/// Writes `config` to `{dir}/{device_name}_{YYYY-MM-DD_HH-MM}.txt`.
///
/// `dir` must already exist and be a directory; it is never created.
pub async fn write_backup(
    dir: &Path,
    device_name: &str,
    config: &str,
) -> Result<PathBuf, UpgradeError> {
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|err| UpgradeError::BackupFailed(format!("{}: {}", dir.display(), err)))?;
    if !metadata.is_dir() {
        return Err(UpgradeError::BackupFailed(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M");
    let path = dir.join(format!("{}_{}.txt", file_safe(device_name), timestamp));
    tokio::fs::write(&path, config)
        .await
        .map_err(|err| UpgradeError::BackupFailed(format!("{}: {}", path.display(), err)))?;

    debug!("{} config saved to {}", device_name, path.display());
    Ok(path)
}

fn file_safe(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}
