//! # rupgrade - Bulk image upgrades for Cisco ASA fleets
//!
//! `rupgrade` pushes a system (`asa*.bin`) or ASDM image to many firewalls in
//! parallel over SSH, points the boot configuration at it, saves, and
//! optionally reloads each device and checks that it comes back.
//!
//! ## Features
//!
//! - **Credential Fallback**: Tries several credential sets and SSH security profiles per device
//! - **Verified Uploads**: SCP transfer followed by an on-device SHA-512 comparison
//! - **Feature Restoration**: The SCP server is switched off again if it was off before
//! - **Worker Pool**: A fixed number of devices are upgraded at a time
//! - **Prompt State Machine**: Login, enable and config modes handled through a regex template
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rupgrade::model::{CredentialSet, DeviceTask, ImageType, UpgradeRequest};
//! use rupgrade::probe::PingProber;
//! use rupgrade::sequencer::Upgrader;
//! use rupgrade::session::SshSessionFactory;
//!
//! #[tokio::main]
//! async fn main() {
//!     let request = Arc::new(UpgradeRequest::new(ImageType::Asa, "asa9-20-2-smp-k8.bin"));
//!     let creds: Arc<[CredentialSet]> =
//!         Arc::from(vec![CredentialSet::new("admin", "password").with_secret("enable")]);
//!
//!     let upgrader = Arc::new(Upgrader::new(SshSessionFactory::default(), PingProber, request));
//!     let tasks = vec![DeviceTask::new("192.0.2.10", creds.clone())];
//!
//!     let done = rupgrade::pool::run(
//!         tasks,
//!         4,
//!         move |task| {
//!             let upgrader = upgrader.clone();
//!             async move { upgrader.upgrade(task).await }
//!         },
//!         |task, reason| task.aborted(&reason),
//!     )
//!     .await;
//!
//!     for device in done {
//!         println!("{} uploaded={} error={}", device.address, device.file_uploaded, device.error);
//!     }
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`connector`] - Credential and device-type fallback search
//! - [`upload`] - SCP feature toggling, transfer and verification
//! - [`sequencer::Upgrader`] - Per-device upgrade sequence
//! - [`pool`] - Worker pool over all devices
//! - [`session`] - SSH sessions driven by a prompt state machine
//! - [`report`] - CSV input and result reports

pub mod backup;
pub mod config;
pub mod connector;
pub mod error;
pub mod model;
pub mod pool;
pub mod probe;
pub mod report;
pub mod sequencer;
pub mod session;
pub mod templates;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;
