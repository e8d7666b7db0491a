//! Credential and device-type fallback search.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{ConnectError, UpgradeError};
use crate::model::CredentialSet;
use crate::session::{DeviceSession, SessionFactory};
use crate::templates::DeviceType;

/// How a single authentication attempt resolved.
#[derive(Debug)]
pub enum Attempt<S> {
    Connected(S),
    /// Wrong credentials, failed elevation or a failed SSH negotiation; the next
    /// combination may work.
    Retry(ConnectError),
    /// The device is unreachable; no other combination will help.
    Abort(ConnectError),
}

/// Tries one credential set with one device type.
pub async fn attempt<F: SessionFactory>(
    factory: &F,
    address: &str,
    credential: &CredentialSet,
    device_type: DeviceType,
    elevate: bool,
    timeout: Option<Duration>,
) -> Attempt<F::Session> {
    let mut session = match factory
        .connect(address, device_type, credential, timeout)
        .await
    {
        Ok(session) => session,
        Err(err) if err.is_retryable() => return Attempt::Retry(err),
        Err(err) => return Attempt::Abort(err),
    };

    if elevate && let Err(err) = session.elevate().await {
        session.close().await;
        return match err {
            ConnectError::ElevationFailed(_) | ConnectError::AuthRejected(_) => {
                Attempt::Retry(err)
            }
            other => Attempt::Retry(ConnectError::ElevationFailed(other.to_string())),
        };
    }
    Attempt::Connected(session)
}

/// Opens a session to `address` with the first credential set and device type
/// the device accepts.
///
/// Credential sets are tried in order, each with every device type in order.
/// A failed SSH negotiation moves on to the next device type. A connect
/// timeout or any other transport failure stops the search immediately. The
/// caller owns the returned session and must close it.
pub async fn connect<F: SessionFactory>(
    factory: &F,
    address: &str,
    credentials: &[CredentialSet],
    elevate: bool,
    device_types: &[DeviceType],
    timeout: Option<Duration>,
) -> Result<F::Session, UpgradeError> {
    if credentials.is_empty() {
        return Err(UpgradeError::NoCredentials);
    }
    let device_types = if device_types.is_empty() {
        &[DeviceType::CiscoAsa][..]
    } else {
        device_types
    };

    let mut last_rejection = None;
    for credential in credentials {
        for &device_type in device_types {
            debug!(
                "{} trying {} as {}",
                address, credential.username, device_type
            );
            match attempt(factory, address, credential, device_type, elevate, timeout).await {
                Attempt::Connected(session) => {
                    info!("{} connected as {} ({})", address, credential.username, device_type);
                    return Ok(session);
                }
                Attempt::Retry(err) => {
                    debug!("{} rejected {}: {}", address, credential.username, err);
                    last_rejection = Some(err);
                }
                Attempt::Abort(err) => {
                    warn!("{} unreachable: {}", address, err);
                    return Err(UpgradeError::ConnectionFailed(err.to_string()));
                }
            }
        }
    }

    let reason = last_rejection
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no credential set accepted".to_string());
    warn!("{} no credential set accepted", address);
    Err(UpgradeError::ConnectionFailed(reason))
}
