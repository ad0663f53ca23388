//! # Serial Modem Transport
//!
//! tokio-serial implementation of [`ModemTransport`] for modems exposing
//! their AT-command interface on a serial port.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, trace};

use super::{LineDisposition, ModemTransport};
use crate::error::{LocateError, Result};
use crate::response::strip_crlf;

/// Default AT-interface baud rate
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Reply wait for commands issued without an explicit timeout
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Cellular modem AT interface over a serial port.
pub struct SerialModem {
    port: BufReader<tokio_serial::SerialStream>,
    device_path: String,
}

impl std::fmt::Debug for SerialModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialModem")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialModem {
    /// Open the modem AT interface on `path` with 8N1 framing.
    ///
    /// # Errors
    ///
    /// Returns error if the serial port cannot be opened.
    pub fn open(path: &str) -> Result<Self> {
        let port = tokio_serial::new(path, MODEM_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LocateError::Transport(format!("failed to open {}: {}", path, e)))?;

        debug!("opened modem AT interface at {}", path);
        Ok(Self {
            port: BufReader::new(port),
            device_path: path.to_string(),
        })
    }

    /// Get the device path of the opened serial port.
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    async fn send(&mut self, cmd: &str) -> Result<()> {
        let stream = self.port.get_mut();
        stream.write_all(cmd.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        trace!("sent {}", cmd);
        Ok(())
    }
}

#[async_trait]
impl ModemTransport for SerialModem {
    async fn command(&mut self, cmd: &str) -> Result<String> {
        let mut reply = String::new();
        let mut collect = |line: &str| {
            if !reply.is_empty() {
                reply.push(' ');
            }
            reply.push_str(line);
            LineDisposition::KeepWaiting
        };
        self.command_with(cmd, DEFAULT_REPLY_TIMEOUT, &mut collect)
            .await?;
        Ok(reply)
    }

    async fn command_with(
        &mut self,
        cmd: &str,
        timeout: Duration,
        on_line: &mut (dyn for<'a> FnMut(&'a str) -> LineDisposition + Send),
    ) -> Result<()> {
        self.send(cmd).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut raw = String::new();

        loop {
            raw.clear();
            let read = tokio::time::timeout_at(deadline, self.port.read_line(&mut raw)).await;
            let n = match read {
                Ok(result) => result?,
                Err(_) => return Err(LocateError::ReplyTimeout(timeout.as_millis() as u64)),
            };
            if n == 0 {
                return Err(LocateError::Transport(format!(
                    "modem port closed while waiting for {} reply",
                    cmd
                )));
            }

            let line = strip_crlf(&raw);
            if line.is_empty() {
                continue;
            }
            trace!("received {}", line);

            // Final result codes end the reply
            if line == "OK" || line == "ERROR" {
                return Ok(());
            }

            let terminal = line.starts_with("+CME ERROR");
            if on_line(&line) == LineDisposition::Done || terminal {
                return Ok(());
            }
        }
    }

    // An open AT port is the only power signal available on a plain serial
    // link; deployments with a power sense line wrap this transport.
    fn is_powered(&self) -> bool {
        true
    }
}
