//! Scripted in-memory devices for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use log::{LevelFilter, Log, Metadata, Record};
use sha2::{Digest, Sha512};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::ConnectError;
use crate::model::CredentialSet;
use crate::probe::Prober;
use crate::session::{DeviceSession, SessionFactory, hex_digest};
use crate::templates::DeviceType;
use crate::upload::SCP_STATUS_COMMAND as SCP_STATUS;

/// How a scripted device behaves.
#[derive(Debug, Clone)]
pub(crate) struct DeviceScript {
    pub prompt: String,
    /// Only this username authenticates; `None` accepts everyone.
    pub accepted_username: Option<String>,
    /// Only this device type negotiates; `None` accepts every type.
    pub accepted_device_type: Option<DeviceType>,
    /// `enable` only succeeds with this secret; `None` always succeeds.
    pub enable_secret: Option<String>,
    pub timeout: bool,
    pub scp_enabled: bool,
    pub free_space: u64,
    pub transfer_fails: bool,
    pub corrupt_upload: bool,
    pub running_config: String,
    /// Configuration lines starting with this prefix are rejected.
    pub reject_config_prefix: Option<String>,
    pub save_fails: bool,
    pub reload_fails: bool,
}

impl DeviceScript {
    pub fn healthy(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            accepted_username: None,
            accepted_device_type: None,
            enable_secret: None,
            timeout: false,
            scp_enabled: true,
            free_space: 8_000_000_000,
            transfer_fails: false,
            corrupt_upload: false,
            running_config: "hostname fw1\n".to_string(),
            reject_config_prefix: None,
            save_fails: false,
            reload_fails: false,
        }
    }
}

/// Everything a scripted device observed.
#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub scp_enabled: bool,
    pub elevated: bool,
    pub commands: Vec<String>,
    pub config_lines: Vec<String>,
    pub transfers: Vec<String>,
    pub digests: HashMap<String, String>,
    pub saved: bool,
    pub reloaded: bool,
    pub closed: bool,
}

pub(crate) struct MockSession {
    script: DeviceScript,
    credential: Option<CredentialSet>,
    state: Arc<Mutex<DeviceState>>,
}

impl MockSession {
    pub fn new(_address: &str, script: DeviceScript) -> Self {
        let state = DeviceState {
            scp_enabled: script.scp_enabled,
            ..Default::default()
        };
        Self::with_state(script, None, Arc::new(Mutex::new(state)))
    }

    fn with_state(
        script: DeviceScript,
        credential: Option<CredentialSet>,
        state: Arc<Mutex<DeviceState>>,
    ) -> Self {
        Self {
            script,
            credential,
            state,
        }
    }

    pub fn state(&self) -> Arc<Mutex<DeviceState>> {
        self.state.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().expect("mock state poisoned")
    }
}

impl DeviceSession for MockSession {
    fn prompt(&self) -> &str {
        &self.script.prompt
    }

    async fn elevate(&mut self) -> Result<(), ConnectError> {
        if let Some(expected) = &self.script.enable_secret {
            let given = self.credential.as_ref().and_then(|c| c.secret.as_ref());
            if given != Some(expected) {
                return Err(ConnectError::ElevationFailed("Invalid password".to_string()));
            }
        }
        self.lock().elevated = true;
        Ok(())
    }

    async fn run_command(&mut self, command: &str) -> Result<String, ConnectError> {
        let mut state = self.lock();
        state.commands.push(command.to_string());
        let output = match command {
            SCP_STATUS if state.scp_enabled => "ssh scopy enable".to_string(),
            SCP_STATUS => String::new(),
            "show running-config" => self.script.running_config.clone(),
            _ => String::new(),
        };
        Ok(output)
    }

    async fn apply_config(&mut self, lines: &[String]) -> Result<String, ConnectError> {
        let mut state = self.lock();
        for line in lines {
            if let Some(prefix) = &self.script.reject_config_prefix
                && line.starts_with(prefix.as_str())
            {
                return Err(ConnectError::CommandFailed {
                    command: line.clone(),
                    output: "ERROR: % Invalid input detected at '^' marker.".to_string(),
                });
            }
            match line.as_str() {
                "ssh scopy enable" => state.scp_enabled = true,
                "no ssh scopy enable" => state.scp_enabled = false,
                _ => {}
            }
            state.config_lines.push(line.clone());
        }
        Ok(String::new())
    }

    async fn save_config(&mut self) -> Result<(), ConnectError> {
        if self.script.save_fails {
            return Err(ConnectError::CommandFailed {
                command: "write memory".to_string(),
                output: "Error writing configuration".to_string(),
            });
        }
        self.lock().saved = true;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), ConnectError> {
        if self.script.reload_fails {
            return Err(ConnectError::ConnectClosedError);
        }
        self.lock().reloaded = true;
        Ok(())
    }

    async fn free_space(&mut self, _drive: &str) -> Result<u64, ConnectError> {
        Ok(self.script.free_space)
    }

    async fn upload_file(
        &mut self,
        source: &mut File,
        _size: u64,
        dest_path: &str,
    ) -> Result<(), ConnectError> {
        if !self.lock().scp_enabled {
            return Err(ConnectError::TransferRejected("scp server disabled".to_string()));
        }
        if self.script.transfer_fails {
            return Err(ConnectError::TransferRejected("disk write error".to_string()));
        }
        let mut content = Vec::new();
        source.read_to_end(&mut content).await?;
        if self.script.corrupt_upload {
            content.push(0xff);
        }
        let digest = sha512_hex(&content);

        let mut state = self.lock();
        state.transfers.push(dest_path.to_string());
        state.digests.insert(dest_path.to_string(), digest);
        Ok(())
    }

    async fn file_checksum(&mut self, dest_path: &str) -> Result<String, ConnectError> {
        self.lock()
            .digests
            .get(dest_path)
            .cloned()
            .ok_or_else(|| ConnectError::CommandFailed {
                command: format!("verify /sha-512 {dest_path}"),
                output: "%Error opening file".to_string(),
            })
    }

    async fn close(self) {
        self.lock().closed = true;
    }
}

/// Factory over a fixed set of scripted devices. Unknown addresses time out.
#[derive(Default)]
pub(crate) struct MockFactory {
    scripts: HashMap<String, DeviceScript>,
    states: HashMap<String, Arc<Mutex<DeviceState>>>,
    attempts: Arc<Mutex<Vec<(String, String, DeviceType)>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: &str, script: DeviceScript) -> Self {
        let state = DeviceState {
            scp_enabled: script.scp_enabled,
            ..Default::default()
        };
        self.states
            .insert(address.to_string(), Arc::new(Mutex::new(state)));
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn state(&self, address: &str) -> Arc<Mutex<DeviceState>> {
        self.states[address].clone()
    }

    /// (address, username, device type) for every connect call, in order.
    pub fn attempts(&self) -> Vec<(String, String, DeviceType)> {
        self.attempts.lock().expect("attempts poisoned").clone()
    }
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    async fn connect(
        &self,
        address: &str,
        device_type: DeviceType,
        credential: &CredentialSet,
        _timeout: Option<Duration>,
    ) -> Result<MockSession, ConnectError> {
        self.attempts.lock().expect("attempts poisoned").push((
            address.to_string(),
            credential.username.clone(),
            device_type,
        ));

        let Some(script) = self.scripts.get(address) else {
            return Err(ConnectError::ConnectTimeout(address.to_string()));
        };
        if script.timeout {
            return Err(ConnectError::ConnectTimeout(address.to_string()));
        }
        if script
            .accepted_device_type
            .is_some_and(|accepted| accepted != device_type)
        {
            return Err(ConnectError::NegotiationFailed(format!(
                "{address}: no common key exchange algorithm"
            )));
        }
        if script
            .accepted_username
            .as_ref()
            .is_some_and(|user| *user != credential.username)
        {
            return Err(ConnectError::AuthRejected(address.to_string()));
        }

        Ok(MockSession::with_state(
            script.clone(),
            Some(credential.clone()),
            self.states[address].clone(),
        ))
    }
}

/// Prober with a fixed answer that counts its calls.
#[derive(Default)]
pub(crate) struct MockProber {
    pub reachable: bool,
    pub calls: AtomicUsize,
}

impl MockProber {
    pub fn answering(reachable: bool) -> Self {
        Self {
            reachable,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Prober for MockProber {
    async fn is_reachable(&self, _address: &str, _attempts: u32) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reachable
    }
}

pub(crate) fn sha512_hex(content: &[u8]) -> String {
    hex_digest(&Sha512::digest(content))
}

/// Keeps every info-or-above log line emitted by the test binary.
struct CapturedLog(Mutex<Vec<String>>);

static CAPTURED: CapturedLog = CapturedLog(Mutex::new(Vec::new()));
static INSTALL_CAPTURE: Once = Once::new();

impl Log for CapturedLog {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs the capturing logger. Safe to call from every test that needs it.
pub(crate) fn capture_logs() {
    INSTALL_CAPTURE.call_once(|| {
        if log::set_logger(&CAPTURED).is_ok() {
            log::set_max_level(LevelFilter::Info);
        }
    });
}

/// Captured lines containing `needle`.
pub(crate) fn captured_logs(needle: &str) -> Vec<String> {
    CAPTURED
        .0
        .lock()
        .expect("captured log poisoned")
        .iter()
        .filter(|line| line.contains(needle))
        .cloned()
        .collect()
}
