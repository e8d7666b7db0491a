//! Minimal SCP sink protocol (`scp -t`) for pushing one file to a device.

use std::time::Duration;

use async_ssh2_tokio::client::Client;
use log::{debug, trace};
use russh::ChannelMsg;
use russh::client::Msg;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config;
use crate::error::ConnectError;

type Channel = russh::Channel<Msg>;

/// Streams `size` bytes of `source` to `dest_path` over a fresh exec channel.
pub(crate) async fn upload(
    client: &Client,
    source: &mut File,
    size: u64,
    dest_path: &str,
) -> Result<(), ConnectError> {
    let mut channel = client.get_channel().await?;
    channel.exec(true, format!("scp -t {dest_path}")).await?;
    wait_ack(&mut channel, config::DEFAULT_COMMAND_TIMEOUT).await?;

    let header = format!("C0644 {size} {}\n", remote_file_name(dest_path));
    trace!("scp header {:?}", header);
    channel.data(header.as_bytes()).await?;
    wait_ack(&mut channel, config::DEFAULT_COMMAND_TIMEOUT).await?;

    let mut buf = vec![0u8; config::SCP_CHUNK_SIZE];
    let mut sent = 0u64;
    while sent < size {
        let read = source.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        channel.data(&buf[..read]).await?;
        sent += read as u64;
    }
    if sent != size {
        return Err(ConnectError::TransferRejected(format!(
            "source ended after {sent} of {size} bytes"
        )));
    }
    debug!("scp sent {} bytes to {}", sent, dest_path);

    channel.data(&[0u8][..]).await?;
    // The device acknowledges only after the image is flushed to flash.
    wait_ack(&mut channel, config::VERIFY_TIMEOUT).await?;
    channel.eof().await?;
    Ok(())
}

async fn wait_ack(channel: &mut Channel, timeout: Duration) -> Result<(), ConnectError> {
    match tokio::time::timeout(timeout, read_ack(channel)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::ExecTimeout("scp acknowledgement".to_string())),
    }
}

async fn read_ack(channel: &mut Channel) -> Result<(), ConnectError> {
    loop {
        let Some(msg) = channel.wait().await else {
            return Err(ConnectError::ChannelDisconnectError);
        };
        match msg {
            ChannelMsg::Data { ref data } => return parse_ack(data),
            ChannelMsg::ExtendedData { ref data, .. } => {
                debug!("scp stderr: {}", String::from_utf8_lossy(data).trim_end());
            }
            ChannelMsg::ExitStatus { exit_status } => {
                return Err(ConnectError::TransferRejected(format!(
                    "scp exited with status {exit_status}"
                )));
            }
            ChannelMsg::Eof | ChannelMsg::Close => {
                return Err(ConnectError::ChannelDisconnectError);
            }
            _ => {}
        }
    }
}

/// A zero byte is success; 1 (warning) and 2 (fatal) carry a message.
fn parse_ack(data: &[u8]) -> Result<(), ConnectError> {
    match data.first() {
        Some(0) => Ok(()),
        Some(_) => Err(ConnectError::TransferRejected(
            String::from_utf8_lossy(&data[1..]).trim().to_string(),
        )),
        None => Err(ConnectError::UnexpectedOutput("empty scp acknowledgement".to_string())),
    }
}

/// `disk0:/asa.bin` -> `asa.bin`
fn remote_file_name(dest_path: &str) -> &str {
    dest_path.rsplit(['/', ':']).next().unwrap_or(dest_path)
}
