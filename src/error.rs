//! Error types for device sessions, upgrade steps and report I/O.
//!
//! [`ConnectError`] is raised by the session layer (SSH, prompt handling, SCP).
//! [`UpgradeError`] is the per-device taxonomy the sequencer folds into a
//! [`DeviceTask`](crate::model::DeviceTask) error message. [`ReportError`] covers
//! reading device lists and writing result reports.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::model::UpgradeStep;

/// Errors that can occur while establishing or driving a device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The device rejected the supplied username/password.
    ///
    /// The connector moves on to the next credential set on this error.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The device did not answer within the connect timeout.
    #[error("connection timed out: {0}")]
    ConnectTimeout(String),

    /// The SSH handshake failed before authentication: no common algorithm,
    /// an unknown or mismatched host key, or the device dropping the
    /// connection during key exchange.
    ///
    /// Another device type with a different security profile may succeed.
    #[error("ssh negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Entering privileged (enable) mode failed after authentication.
    #[error("privilege elevation failed: {0}")]
    ElevationFailed(String),

    /// The SSH channel was disconnected while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The SSH connection has been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// Command execution timed out.
    ///
    /// Contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The device answered a command with an error line.
    #[error("command '{command}' failed: {output}")]
    CommandFailed { command: String, output: String },

    /// Command output could not be interpreted.
    #[error("unexpected output: {0}")]
    UnexpectedOutput(String),

    /// The remote SCP sink refused the copy.
    #[error("scp transfer rejected: {0}")]
    TransferRejected(String),

    /// The target mode cannot be reached from the current mode.
    #[error("unreachable state {0}")]
    UnreachableState(String),

    /// A prompt handler was built from invalid patterns.
    #[error("invalid prompt handler config: {0}")]
    InvalidHandlerConfig(String),

    /// No device template exists under this name.
    #[error("device type '{0}' not found")]
    TemplateNotFound(String),

    /// Local file access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl ConnectError {
    /// Returns true for failures that mean "wrong credentials" rather than
    /// "device unreachable".
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            ConnectError::AuthRejected(_) | ConnectError::ElevationFailed(_)
        )
    }

    /// Returns true when another credential set or device type may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_auth_rejection() || matches!(self, ConnectError::NegotiationFailed(_))
    }
}

/// Per-device failures. Every variant is terminal for the device it occurred on.
#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("no credentials provided")]
    NoCredentials,

    #[error("unable to connect to device: {0}")]
    ConnectionFailed(String),

    #[error("config backup failed: {0}")]
    BackupFailed(String),

    #[error("not enough space to upload file")]
    InsufficientSpace,

    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    #[error("file transfer verification failed")]
    IntegrityCheckFailed,

    #[error("{step} failed: {source}")]
    StepFailed {
        step: UpgradeStep,
        #[source]
        source: ConnectError,
    },
}

impl UpgradeError {
    /// The sequence step this failure halts on.
    pub fn step(&self) -> UpgradeStep {
        match self {
            UpgradeError::NoCredentials | UpgradeError::ConnectionFailed(_) => {
                UpgradeStep::Connecting
            }
            UpgradeError::BackupFailed(_) => UpgradeStep::BackingUp,
            UpgradeError::InsufficientSpace
            | UpgradeError::TransferFailed(_)
            | UpgradeError::IntegrityCheckFailed => UpgradeStep::Uploading,
            UpgradeError::StepFailed { step, .. } => *step,
        }
    }
}

/// Errors raised while reading device lists or writing reports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input is missing the '{0}' column")]
    MissingColumn(String),

    #[error("line {line}: '{address}' is not an IP address or host name")]
    InvalidAddress { line: u64, address: String },
}

#[cfg(test)]
mod tests {
    use super::{ConnectError, UpgradeError};
    use crate::model::UpgradeStep;

    #[test]
    fn auth_failures_are_retryable_and_timeouts_are_not() {
        assert!(ConnectError::AuthRejected("bad password".into()).is_auth_rejection());
        assert!(ConnectError::ElevationFailed("enable".into()).is_auth_rejection());
        assert!(!ConnectError::ConnectTimeout("10.0.0.1".into()).is_auth_rejection());
        assert!(!ConnectError::ChannelDisconnectError.is_auth_rejection());
    }

    #[test]
    fn negotiation_failures_are_retryable_but_not_auth_rejections() {
        let err = ConnectError::NegotiationFailed("no common kex algorithm".into());
        assert!(err.is_retryable());
        assert!(!err.is_auth_rejection());
        assert!(ConnectError::AuthRejected("x".into()).is_retryable());
        assert!(!ConnectError::ConnectTimeout("10.0.0.1".into()).is_retryable());
        assert!(!ConnectError::ConnectClosedError.is_retryable());
    }

    #[test]
    fn upgrade_errors_map_to_their_step() {
        assert_eq!(UpgradeError::NoCredentials.step(), UpgradeStep::Connecting);
        assert_eq!(
            UpgradeError::BackupFailed("x".into()).step(),
            UpgradeStep::BackingUp
        );
        assert_eq!(UpgradeError::IntegrityCheckFailed.step(), UpgradeStep::Uploading);
        let err = UpgradeError::StepFailed {
            step: UpgradeStep::SavingConfig,
            source: ConnectError::ConnectClosedError,
        };
        assert_eq!(err.step(), UpgradeStep::SavingConfig);
        assert_eq!(err.to_string(), "saving config failed: connect closed");
    }
}
