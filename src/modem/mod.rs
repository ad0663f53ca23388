//! # Modem Capability Interfaces
//!
//! Traits for the hardware the acquisition engine drives: the modem's
//! AT-command transport, antenna power control, cloud connectivity, the wall
//! clock and modem-model detection. The engine only ever talks to hardware
//! through these seams; [`serial`] provides a tokio-serial transport for real
//! modems.

pub mod serial;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::Constellation;
use crate::error::Result;

/// Start the GNSS session
pub(crate) const CMD_GNSS_START: &str = "AT+QGPS=1";

/// Stop the GNSS session
pub(crate) const CMD_GNSS_STOP: &str = "AT+QGPSEND";

/// Query the current position (decimal-degrees output format)
pub(crate) const CMD_POSITION: &str = "AT+QGPSLOC=2";

/// Query the accuracy estimate
pub(crate) const CMD_ACCURACY: &str = "AT+QGPSCFG=\"estimation_error\"";

/// Enable extended accuracy reporting
pub(crate) const CMD_ENABLE_EPE: &str = "AT+QGPSCFG=\"nmea_epe\",1";

/// Constellation configuration command for the current selection.
pub(crate) fn constellation_command(constellation: Constellation) -> String {
    format!(
        "AT+QGPSCFG=\"gnssconfig\",{}",
        constellation.gnss_config_index()
    )
}

/// What a reply-line handler wants the transport to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    /// Keep collecting reply lines until the command completes or times out
    KeepWaiting,
    /// Stop waiting for further reply lines
    Done,
}

/// Detected cellular modem model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemModel {
    /// Model has not been read yet, typically because the modem is off
    Unavailable,
    /// Model does not support GNSS acquisition through this engine
    Unsupported,
    /// Quectel BG95-M5
    Bg95M5,
    /// Quectel EG91
    Eg91,
}

impl ModemModel {
    /// Whether this model can run an acquisition at all.
    pub fn is_supported(self) -> bool {
        matches!(self, ModemModel::Bg95M5 | ModemModel::Eg91)
    }

    /// Whether this model reports extended accuracy estimates.
    pub fn has_accuracy_reports(self) -> bool {
        matches!(self, ModemModel::Bg95M5)
    }

    /// Whether this model takes a constellation configuration command.
    pub fn has_constellation_config(self) -> bool {
        matches!(self, ModemModel::Bg95M5)
    }
}

/// Transport to the cellular modem's AT-command interface.
#[async_trait]
pub trait ModemTransport: Send {
    /// Issue a command and collect the complete raw reply text.
    async fn command(&mut self, cmd: &str) -> Result<String>;

    /// Issue a command, handing each received reply line (CR/LF stripped) to
    /// `on_line` until the handler is done, the command completes or
    /// `timeout` elapses.
    async fn command_with(
        &mut self,
        cmd: &str,
        timeout: Duration,
        on_line: &mut (dyn for<'a> FnMut(&'a str) -> LineDisposition + Send),
    ) -> Result<()>;

    /// Whether the modem currently has power.
    fn is_powered(&self) -> bool;
}

/// Power switch for an active GNSS antenna.
pub trait AntennaPower: Send {
    fn set(&mut self, on: bool);
}

/// Connectivity to the cloud for publishing acquired locations.
#[async_trait]
pub trait CloudLink: Send {
    /// Whether the device currently has cloud connectivity.
    fn is_connected(&self) -> bool;

    /// Publish an event; returns whether the cloud accepted it.
    async fn publish(&mut self, event: &str, payload: &str) -> bool;
}

/// Cloud link for deployments without connectivity; never connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCloud;

#[async_trait]
impl CloudLink for NoCloud {
    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&mut self, _event: &str, _payload: &str) -> bool {
        false
    }
}

/// Wall-clock time source for stamping fixes with system time.
pub trait WallClock: Send {
    /// Current wall-clock time as epoch seconds.
    fn now_epoch(&self) -> i64;
}

/// System wall clock backed by chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Modem model lookup, typically a table over the device identification.
pub trait ModemDetect: Send {
    /// Read the fitted modem model. [`ModemModel::Unavailable`] means the
    /// model could not be read yet and detection will be retried.
    fn detect(&mut self) -> ModemModel;
}

/// Detector for deployments where the fitted modem is known ahead of time.
#[derive(Debug, Clone, Copy)]
pub struct FixedModemDetect(pub ModemModel);

impl ModemDetect for FixedModemDetect {
    fn detect(&mut self) -> ModemModel {
        self.0
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted modem for engine tests.
    ///
    /// Position queries are answered from a reply queue; the final entry is
    /// sticky so a short script can cover an arbitrarily long poll loop.
    /// Power can be switched off from the test, or automatically after a set
    /// number of position polls.
    #[derive(Clone)]
    pub struct MockModem {
        pub position_replies: Arc<Mutex<VecDeque<String>>>,
        pub accuracy_reply: Arc<Mutex<Option<String>>>,
        pub powered: Arc<AtomicBool>,
        pub power_off_after_polls: Arc<Mutex<Option<u32>>>,
        pub sent_commands: Arc<Mutex<Vec<String>>>,
    }

    impl MockModem {
        pub fn new() -> Self {
            Self {
                position_replies: Arc::new(Mutex::new(VecDeque::new())),
                accuracy_reply: Arc::new(Mutex::new(None)),
                powered: Arc::new(AtomicBool::new(true)),
                power_off_after_polls: Arc::new(Mutex::new(None)),
                sent_commands: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn script_positions(&self, replies: &[&str]) {
            let mut queue = self.position_replies.lock().unwrap();
            queue.clear();
            queue.extend(replies.iter().map(|r| r.to_string()));
        }

        pub fn script_accuracy(&self, reply: &str) {
            *self.accuracy_reply.lock().unwrap() = Some(reply.to_string());
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent_commands.lock().unwrap().clone()
        }

        pub fn count_sent(&self, cmd: &str) -> usize {
            self.sent_commands
                .lock()
                .unwrap()
                .iter()
                .filter(|sent| sent.as_str() == cmd)
                .count()
        }

        fn next_position_reply(&self) -> Option<String> {
            if let Some(polls) = self.power_off_after_polls.lock().unwrap().as_mut() {
                *polls = polls.saturating_sub(1);
                if *polls == 0 {
                    self.powered.store(false, Ordering::SeqCst);
                }
            }

            let mut queue = self.position_replies.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
    }

    #[async_trait]
    impl ModemTransport for MockModem {
        async fn command(&mut self, cmd: &str) -> Result<String> {
            self.sent_commands.lock().unwrap().push(cmd.to_string());
            Ok("OK".to_string())
        }

        async fn command_with(
            &mut self,
            cmd: &str,
            _timeout: Duration,
            on_line: &mut (dyn for<'a> FnMut(&'a str) -> LineDisposition + Send),
        ) -> Result<()> {
            self.sent_commands.lock().unwrap().push(cmd.to_string());

            let reply = if cmd == CMD_POSITION {
                self.next_position_reply()
            } else if cmd == CMD_ACCURACY {
                self.accuracy_reply.lock().unwrap().clone()
            } else {
                None
            };

            if let Some(reply) = reply {
                on_line(&reply);
            }
            Ok(())
        }

        fn is_powered(&self) -> bool {
            self.powered.load(Ordering::SeqCst)
        }
    }

    /// Antenna power switch recording every transition.
    #[derive(Clone)]
    pub struct MockAntenna {
        pub transitions: Arc<Mutex<Vec<bool>>>,
    }

    impl MockAntenna {
        pub fn new() -> Self {
            Self {
                transitions: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl AntennaPower for MockAntenna {
        fn set(&mut self, on: bool) {
            self.transitions.lock().unwrap().push(on);
        }
    }

    /// Cloud link recording published events.
    #[derive(Clone)]
    pub struct MockCloud {
        pub connected: Arc<AtomicBool>,
        pub accept: Arc<AtomicBool>,
        pub published: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockCloud {
        pub fn new(connected: bool) -> Self {
            Self {
                connected: Arc::new(AtomicBool::new(connected)),
                accept: Arc::new(AtomicBool::new(true)),
                published: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl CloudLink for MockCloud {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn publish(&mut self, event: &str, payload: &str) -> bool {
            self.published
                .lock()
                .unwrap()
                .push((event.to_string(), payload.to_string()));
            self.accept.load(Ordering::SeqCst)
        }
    }

    /// Wall clock pinned to a fixed instant.
    #[derive(Debug, Clone, Copy)]
    pub struct FixedWallClock(pub i64);

    impl WallClock for FixedWallClock {
        fn now_epoch(&self) -> i64 {
            self.0
        }
    }
}
