use std::future::Future;
use std::process::Stdio;

use log::{debug, warn};
use tokio::process::Command;

/// Checks whether a device answers on the network.
pub trait Prober: Send + Sync {
    fn is_reachable(&self, address: &str, attempts: u32) -> impl Future<Output = bool> + Send;
}

/// Shells out to the system `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl Prober for PingProber {
    async fn is_reachable(&self, address: &str, attempts: u32) -> bool {
        let status = Command::new("ping")
            .args(ping_args(address, attempts))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => {
                debug!("{} ping exited with {}", address, status);
                status.success()
            }
            Err(err) => {
                warn!("{} could not run ping: {}", address, err);
                false
            }
        }
    }
}

fn ping_args(address: &str, attempts: u32) -> Vec<String> {
    let count_flag = if cfg!(windows) { "-n" } else { "-c" };
    vec![
        count_flag.to_string(),
        attempts.to_string(),
        address.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_flag_matches_platform() {
        let args = ping_args("10.0.0.1", 4);
        let flag = if cfg!(windows) { "-n" } else { "-c" };
        assert_eq!(args, vec![flag, "4", "10.0.0.1"]);
    }
}
