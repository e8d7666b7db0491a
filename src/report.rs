//! CSV device lists in, CSV result reports out.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ReportError;
use crate::model::{CredentialSet, DeviceTask};

/// Column holding device addresses in the input file.
pub const ADDRESS_COLUMN: &str = "IP Address";

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid HOSTNAME regex: {err}"),
    }
});

/// True for an IP literal or a DNS host name. Anything else, notably text
/// starting with `-`, would end up as an option to `ping` or the SSH client.
pub fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok() || HOSTNAME.is_match(address)
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "IP Address")]
    address: &'a str,
    #[serde(rename = "Connected")]
    connected: bool,
    #[serde(rename = "FileUploaded")]
    file_uploaded: bool,
    #[serde(rename = "ConfigBackedUp")]
    config_backed_up: bool,
    #[serde(rename = "SuccessfullyRebooted")]
    successfully_rebooted: bool,
    #[serde(rename = "Error")]
    error: &'a str,
}

impl<'a> From<&'a DeviceTask> for ReportRow<'a> {
    fn from(task: &'a DeviceTask) -> Self {
        Self {
            name: &task.name,
            address: &task.address,
            connected: task.connected,
            file_uploaded: task.file_uploaded,
            config_backed_up: task.config_backed_up,
            successfully_rebooted: task.successfully_rebooted,
            error: &task.error,
        }
    }
}

/// Reads one [`DeviceTask`] per non-blank address in the input CSV. A value
/// that is neither an IP address nor a host name fails the whole read.
pub fn read_devices(
    path: &Path,
    credentials: Arc<[CredentialSet]>,
) -> Result<Vec<DeviceTask>, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let column = reader
        .headers()?
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}') == ADDRESS_COLUMN)
        .ok_or_else(|| ReportError::MissingColumn(ADDRESS_COLUMN.to_string()))?;

    let mut devices = Vec::new();
    for record in reader.records() {
        let record = record?;
        match record.get(column) {
            Some(address) if !address.is_empty() => {
                if !is_valid_address(address) {
                    let line = record.position().map_or(0, |pos| pos.line());
                    return Err(ReportError::InvalidAddress {
                        line,
                        address: address.to_string(),
                    });
                }
                devices.push(DeviceTask::new(address, credentials.clone()));
            }
            _ => debug!("skipping row {:?} without address", record.position()),
        }
    }
    info!("read {} devices from {}", devices.len(), path.display());
    Ok(devices)
}

/// Writes one report row per device.
pub fn write_report(path: &Path, devices: &[DeviceTask]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for device in devices {
        writer.serialize(ReportRow::from(device))?;
    }
    writer.flush()?;
    info!("wrote report for {} devices to {}", devices.len(), path.display());
    Ok(())
}
