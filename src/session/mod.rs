//! Device sessions: the seam between the upgrade workflow and the wire.
//!
//! The workflow only talks to the [`SessionFactory`] and [`DeviceSession`]
//! traits. [`SshSessionFactory`] is the production implementation: an SSH shell
//! driven by a [`PromptHandler`], with SCP for image uploads.
//!
//! # Main Components
//!
//! - [`SessionFactory`] - Opens an authenticated session for one credential/device type
//! - [`DeviceSession`] - Commands, configuration and file primitives on an open session
//! - [`FileTransfer`] - Scoped upload handle with space and integrity checks
//! - [`SshSession`] - SSH implementation of [`DeviceSession`]

use std::future::Future;
use std::time::Duration;

use tokio::fs::File;

use crate::error::ConnectError;
use crate::model::CredentialSet;
use crate::templates::DeviceType;

pub use client::{SshSession, SshSessionFactory};
pub use handler::{IGNORE_START_LINE, Input, PromptHandler};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use transfer::FileTransfer;
pub(crate) use transfer::hex_digest;

/// Opens sessions to devices.
pub trait SessionFactory: Send + Sync {
    type Session: DeviceSession + 'static;

    /// Authenticates to `address` with one credential set and device type.
    ///
    /// Wrong credentials must surface as [`ConnectError::AuthRejected`] and an
    /// unresponsive device as [`ConnectError::ConnectTimeout`]; the connector
    /// treats the two very differently.
    fn connect(
        &self,
        address: &str,
        device_type: DeviceType,
        credential: &CredentialSet,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}

/// An authenticated, interactive session on one device.
pub trait DeviceSession: Send {
    /// Current shell prompt, e.g. `fw-edge-01#`.
    fn prompt(&self) -> &str;

    /// Enters privileged mode.
    fn elevate(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Runs an exec-mode command and returns its output without echo and prompt.
    fn run_command(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Applies configuration lines in configuration mode.
    fn apply_config(
        &mut self,
        lines: &[String],
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Persists the running configuration.
    fn save_config(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Issues a reload, answering its confirmation prompts. The session is
    /// unusable afterwards.
    fn reload(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Free bytes on a device file system.
    fn free_space(&mut self, drive: &str)
    -> impl Future<Output = Result<u64, ConnectError>> + Send;

    /// Copies `size` bytes from `source` to `dest_path` on the device.
    fn upload_file(
        &mut self,
        source: &mut File,
        size: u64,
        dest_path: &str,
    ) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Lowercase hex SHA-512 of a file on the device.
    fn file_checksum(
        &mut self,
        dest_path: &str,
    ) -> impl Future<Output = Result<String, ConnectError>> + Send;

    /// Ends the session. Errors are logged, not returned.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

mod client;
mod handler;
mod scp;
mod security;
mod transfer;
