use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::ChannelMsg;
use tokio::fs::File;
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::handler::{IGNORE_START_LINE, PromptHandler};
use super::{DeviceSession, SessionFactory, scp};
use crate::config;
use crate::error::ConnectError;
use crate::model::CredentialSet;
use crate::templates::DeviceType;

static FREE_BYTES: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\((\d+) bytes free") {
    Ok(re) => re,
    Err(err) => panic!("invalid FREE_BYTES regex: {err}"),
});

static SHA512_DIGEST: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"=\s*([0-9a-fA-F]{128})") {
        Ok(re) => re,
        Err(err) => panic!("invalid SHA512_DIGEST regex: {err}"),
    });

/// Opens [`SshSession`]s on a fixed port.
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    port: u16,
}

impl Default for SshSessionFactory {
    fn default() -> Self {
        Self {
            port: config::SSH_PORT,
        }
    }
}

impl SshSessionFactory {
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl SessionFactory for SshSessionFactory {
    type Session = SshSession;

    async fn connect(
        &self,
        address: &str,
        device_type: DeviceType,
        credential: &CredentialSet,
        timeout: Option<Duration>,
    ) -> Result<SshSession, ConnectError> {
        SshSession::connect(
            address,
            self.port,
            device_type,
            credential,
            timeout.unwrap_or(config::DEFAULT_CONNECT_TIMEOUT),
        )
        .await
    }
}

/// Output of one command.
#[derive(Debug)]
struct Output {
    /// False when the device printed an error line before the prompt.
    success: bool,
    /// Output without the echoed command and trailing prompt.
    content: String,
}

/// SSH connection to one device and the interactive shell running on it.
pub struct SshSession {
    client: Client,
    shell: Shell,
}

impl SshSession {
    async fn connect(
        address: &str,
        port: u16,
        device_type: DeviceType,
        credential: &CredentialSet,
        connect_timeout: Duration,
    ) -> Result<SshSession, ConnectError> {
        let device_addr = format!("{}@{address}:{port}", credential.username);
        let security = device_type.security();

        let ssh_config = Config {
            preferred: security.preferred(),
            inactivity_timeout: Some(config::DEFAULT_COMMAND_TIMEOUT),
            ..Default::default()
        };

        let connecting = Client::connect_with_config(
            (address.to_string(), port),
            &credential.username,
            AuthMethod::with_password(&credential.password),
            security.server_check.clone(),
            ssh_config,
        );
        let client = match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(Ok(client)) => client,
            Ok(Err(err)) => return Err(classify_connect_error(&device_addr, err)),
            Err(_) => return Err(ConnectError::ConnectTimeout(device_addr)),
        };
        debug!("{} authenticated as {}", device_addr, device_type);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} shell opened", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let task_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} failed to send data to shell: {:?}", task_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                if let Ok(s) = std::str::from_utf8(data)
                                    && sender_to_user.send(s.to_string()).await.is_err() {
                                        debug!("{} shell output receiver dropped", task_addr);
                                        break;
                                    }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} shell exited with status {}", task_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} shell sent EOF", task_addr);
                                break;
                            }
                            _ => {}
                        }
                    },
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended", task_addr);
        });

        let mut handler = device_type.handler()?;
        handler.dyn_param.insert(
            "EnablePassword".to_string(),
            format!("{}\n", credential.secret.as_deref().unwrap_or_default()),
        );

        let shell = Shell::open(device_addr, sender_to_shell, receiver_from_shell, handler).await?;
        Ok(Self { client, shell })
    }
}

/// Sorts a failed SSH connect into the classes the connector acts on.
/// Handshake failures become [`ConnectError::NegotiationFailed`] so another
/// security profile gets a chance.
fn classify_connect_error(device_addr: &str, err: async_ssh2_tokio::Error) -> ConnectError {
    match err {
        async_ssh2_tokio::Error::PasswordWrong => {
            ConnectError::AuthRejected(device_addr.to_string())
        }
        async_ssh2_tokio::Error::ServerCheckFailed => {
            ConnectError::NegotiationFailed(format!("{device_addr} host key not trusted"))
        }
        async_ssh2_tokio::Error::SshError(err) if is_handshake_error(&err) => {
            ConnectError::NegotiationFailed(format!("{device_addr} {err}"))
        }
        other => other.into(),
    }
}

fn is_handshake_error(err: &russh::Error) -> bool {
    matches!(
        err,
        russh::Error::KexInit
            | russh::Error::Kex
            | russh::Error::UnknownAlgo
            | russh::Error::NoCommonAlgo { .. }
            | russh::Error::Version
            | russh::Error::UnknownKey
            | russh::Error::WrongServerSig
            | russh::Error::KeyChanged { .. }
            | russh::Error::Disconnect
            | russh::Error::HUP
    )
}

/// Prompt-driven command channel to a device shell.
///
/// Text written to `sender` reaches the device; everything the device prints
/// arrives on `recv`, already split off the SSH channel by the I/O task.
struct Shell {
    address: String,
    sender: Sender<String>,
    recv: Receiver<String>,
    handler: PromptHandler,
}

impl Shell {
    /// Waits for the first prompt after login.
    async fn open(
        address: String,
        sender: Sender<String>,
        mut recv: Receiver<String>,
        mut handler: PromptHandler,
    ) -> Result<Shell, ConnectError> {
        let mut banner = String::new();
        let first_prompt = read_until_prompt(&mut handler, &mut recv, &sender, &mut banner);
        match tokio::time::timeout(config::PROMPT_TIMEOUT, first_prompt).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(ConnectError::ExecTimeout(format!(
                    "{address} no prompt after login"
                )));
            }
        }
        debug!(
            "{} initial prompt {:?} in {}",
            address,
            handler.current_prompt(),
            handler.current_state()
        );

        Ok(Self {
            address,
            sender,
            recv,
            handler,
        })
    }

    fn prompt(&self) -> &str {
        self.handler.current_prompt().unwrap_or_default()
    }

    /// Sends a command and collects output until the next prompt.
    async fn write_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        while self.recv.try_recv().is_ok() {}

        self.sender.send(format!("{command}\n")).await?;

        let mut all = String::new();
        let reading = read_until_prompt(&mut self.handler, &mut self.recv, &self.sender, &mut all);
        let success = match tokio::time::timeout(timeout, reading).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::ExecTimeout(all)),
        };

        let mut content = all.as_str();
        if !command.is_empty() && content.starts_with(command) {
            content = content
                .strip_prefix(command)
                .unwrap_or(content)
                .trim_start_matches(['\n', '\r']);
        }
        let content = match content.rfind('\n') {
            Some(pos) => &content[..pos],
            None => "",
        };

        Ok(Output {
            success,
            content: content.to_string(),
        })
    }

    /// Walks the mode graph to `mode`, failing if a hop does not land.
    async fn enter_mode(&mut self, mode: &str, timeout: Duration) -> Result<(), ConnectError> {
        let trans_cmds = self.handler.trans_state_write(mode)?;
        for (t_cmd, target_state) in trans_cmds {
            debug!("{} trans state command: {}", self.address, t_cmd);
            let output = self.write_with_timeout(&t_cmd, timeout).await?;
            if !output.success || self.handler.current_state() != target_state {
                return Err(ConnectError::CommandFailed {
                    command: t_cmd,
                    output: output.content,
                });
            }
        }
        Ok(())
    }

    async fn write_with_mode(
        &mut self,
        command: &str,
        mode: &str,
        timeout: Duration,
    ) -> Result<String, ConnectError> {
        self.enter_mode(mode, timeout).await?;
        let output = self.write_with_timeout(command, timeout).await?;
        if !output.success {
            return Err(ConnectError::CommandFailed {
                command: command.to_string(),
                output: output.content,
            });
        }
        Ok(output.content)
    }

    /// Exec commands run from enable mode when we hold it, otherwise from login.
    fn exec_mode(&self) -> String {
        match self.handler.current_state() {
            "config" => "enable".to_string(),
            state => state.to_string(),
        }
    }

    async fn elevate(&mut self) -> Result<(), ConnectError> {
        if let Err(err) = self
            .enter_mode("enable", config::DEFAULT_COMMAND_TIMEOUT)
            .await
        {
            return Err(match err {
                ConnectError::CommandFailed { output, .. } => {
                    ConnectError::ElevationFailed(format!("{}: {}", self.address, output.trim()))
                }
                other => other,
            });
        }
        debug!("{} in enable mode", self.address);

        if let Err(e) = self
            .write_with_timeout("terminal pager 0", config::DEFAULT_COMMAND_TIMEOUT)
            .await
        {
            debug!("{} could not disable pager: {}", self.address, e);
        }
        Ok(())
    }

    async fn run_command(&mut self, command: &str) -> Result<String, ConnectError> {
        let mode = self.exec_mode();
        self.write_with_mode(command, &mode, config::DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn apply_config(&mut self, lines: &[String]) -> Result<String, ConnectError> {
        let mut all = String::new();
        for line in lines {
            let output = self
                .write_with_mode(line, "config", config::DEFAULT_COMMAND_TIMEOUT)
                .await?;
            all.push_str(&output);
        }
        self.enter_mode("enable", config::DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(all)
    }

    async fn save_config(&mut self) -> Result<(), ConnectError> {
        let output = self
            .write_with_mode("write memory", "enable", config::DEFAULT_COMMAND_TIMEOUT)
            .await?;
        if !output.contains("[OK]") {
            return Err(ConnectError::CommandFailed {
                command: "write memory".to_string(),
                output,
            });
        }
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), ConnectError> {
        self.enter_mode("enable", config::DEFAULT_COMMAND_TIMEOUT)
            .await?;
        // The device drops the session once the reload is confirmed.
        match self
            .write_with_timeout("reload", Duration::from_secs(30))
            .await
        {
            Ok(output) if !output.success => Err(ConnectError::CommandFailed {
                command: "reload".to_string(),
                output: output.content,
            }),
            Ok(_) | Err(ConnectError::ChannelDisconnectError) | Err(ConnectError::ExecTimeout(_)) => {
                debug!("{} reload issued", self.address);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn free_space(&mut self, drive: &str) -> Result<u64, ConnectError> {
        let output = self
            .write_with_mode(&format!("dir {drive}"), "enable", config::DEFAULT_COMMAND_TIMEOUT)
            .await?;
        parse_free_bytes(&output)
    }

    async fn file_checksum(&mut self, dest_path: &str) -> Result<String, ConnectError> {
        let output = self
            .write_with_mode(
                &format!("verify /sha-512 {dest_path}"),
                "enable",
                config::VERIFY_TIMEOUT,
            )
            .await?;
        parse_sha512(&output)
    }
}

/// Feeds shell output through `handler` until a prompt line arrives, answering
/// interactive questions on the way. Returns false when an error line was seen.
async fn read_until_prompt(
    handler: &mut PromptHandler,
    recv: &mut Receiver<String>,
    sender: &Sender<String>,
    clean_output: &mut String,
) -> Result<bool, ConnectError> {
    let mut line_buffer = String::new();
    let mut is_error = false;
    loop {
        let Some(data) = recv.recv().await else {
            return Err(ConnectError::ChannelDisconnectError);
        };
        trace!("{:?}", data);
        line_buffer.push_str(&data);

        while let Some(newline_pos) = line_buffer.find('\n') {
            let line: String = line_buffer.drain(..=newline_pos).collect();
            let trim_start = IGNORE_START_LINE.replace(&line, "");
            handler.read(trim_start.trim_end());
            if handler.error() {
                is_error = true;
            }
            clean_output.push_str(&trim_start);
        }

        if line_buffer.is_empty() {
            continue;
        }
        if handler.read_prompt(&line_buffer) {
            handler.read(&line_buffer);
            clean_output.push_str(&line_buffer);
            return Ok(!is_error);
        }
        if let Some((input, is_record)) = handler.read_need_write(&line_buffer) {
            handler.read(&line_buffer);
            if !is_record {
                line_buffer.clear();
            }
            trace!("Input required: '{:?}'", input);
            sender.send(input).await?;
        }
    }
}

impl DeviceSession for SshSession {
    fn prompt(&self) -> &str {
        self.shell.prompt()
    }

    async fn elevate(&mut self) -> Result<(), ConnectError> {
        self.shell.elevate().await
    }

    async fn run_command(&mut self, command: &str) -> Result<String, ConnectError> {
        self.shell.run_command(command).await
    }

    async fn apply_config(&mut self, lines: &[String]) -> Result<String, ConnectError> {
        self.shell.apply_config(lines).await
    }

    async fn save_config(&mut self) -> Result<(), ConnectError> {
        self.shell.save_config().await
    }

    async fn reload(&mut self) -> Result<(), ConnectError> {
        self.shell.reload().await
    }

    async fn free_space(&mut self, drive: &str) -> Result<u64, ConnectError> {
        self.shell.free_space(drive).await
    }

    async fn upload_file(
        &mut self,
        source: &mut File,
        size: u64,
        dest_path: &str,
    ) -> Result<(), ConnectError> {
        debug!("{} scp {} bytes to {}", self.shell.address, size, dest_path);
        scp::upload(&self.client, source, size, dest_path).await
    }

    async fn file_checksum(&mut self, dest_path: &str) -> Result<String, ConnectError> {
        self.shell.file_checksum(dest_path).await
    }

    async fn close(mut self) {
        self.shell.recv.close();
        if !self.client.is_closed() {
            if let Err(e) = self.shell.sender.send("exit\n".to_string()).await {
                warn!("{} failed to send exit: {:?}", self.shell.address, e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        debug!("{} SSH session closed", self.shell.address);
    }
}

/// Reads the free byte count from `dir` output.
fn parse_free_bytes(output: &str) -> Result<u64, ConnectError> {
    FREE_BYTES
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| ConnectError::UnexpectedOutput(output.to_string()))
}

/// Reads the digest from `verify /sha-512` output, lowercased.
fn parse_sha512(output: &str) -> Result<String, ConnectError> {
    SHA512_DIGEST
        .captures(output)
        .map(|caps| caps[1].to_ascii_lowercase())
        .ok_or_else(|| ConnectError::UnexpectedOutput(output.to_string()))
}
