use std::io::SeekFrom;
use std::path::Path;

use log::debug;
use sha2::{Digest, Sha512};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::DeviceSession;
use crate::error::ConnectError;

/// Upload handle bound to one session, source file and destination.
///
/// The local image stays open for the lifetime of the handle and is closed
/// when it goes out of scope, whatever path the upload takes.
pub struct FileTransfer<'a, S: DeviceSession> {
    session: &'a mut S,
    file: File,
    size: u64,
    drive: String,
    dest_path: String,
}

impl<'a, S: DeviceSession> FileTransfer<'a, S> {
    /// Opens `source` for upload to `drive` + `dest_file`.
    pub async fn open(
        session: &'a mut S,
        source: &Path,
        dest_file: &str,
        drive: &str,
    ) -> Result<FileTransfer<'a, S>, ConnectError> {
        let file = File::open(source).await?;
        let size = file.metadata().await?.len();

        Ok(Self {
            session,
            file,
            size,
            drive: drive.to_string(),
            dest_path: format!("{drive}{dest_file}"),
        })
    }

    /// Device-side path the image is written to.
    pub fn dest_path(&self) -> &str {
        &self.dest_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// True when the destination file system has room for the image.
    pub async fn has_space(&mut self) -> Result<bool, ConnectError> {
        let free = self.session.free_space(&self.drive).await?;
        debug!(
            "{} bytes free on {}, image needs {}",
            free, self.drive, self.size
        );
        Ok(free > self.size)
    }

    pub async fn transfer(&mut self) -> Result<(), ConnectError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        self.session
            .upload_file(&mut self.file, self.size, &self.dest_path)
            .await
    }

    /// Compares the device's SHA-512 of the copy with the local image.
    pub async fn verify(&mut self) -> Result<bool, ConnectError> {
        let local = self.local_digest().await?;
        let remote = self.session.file_checksum(&self.dest_path).await?;
        debug!("{} local sha512 {} remote {}", self.dest_path, local, remote);
        Ok(remote.eq_ignore_ascii_case(&local))
    }

    async fn local_digest(&mut self) -> Result<String, ConnectError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        let mut hasher = Sha512::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = self.file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hex_digest(&hasher.finalize()))
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
