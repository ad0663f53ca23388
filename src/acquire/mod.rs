//! # Acquisition Worker
//!
//! The single background task that owns modem interaction during an
//! acquisition attempt: it sequences the GNSS AT commands, feeds replies to
//! the response parser, drives the fix evaluator and delivers the final
//! outcome back to the caller.

pub(crate) mod evaluator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::config::LocationConfig;
use crate::modem::{
    constellation_command, AntennaPower, LineDisposition, ModemModel, ModemTransport, WallClock,
    CMD_ACCURACY, CMD_ENABLE_EPE, CMD_GNSS_START, CMD_GNSS_STOP, CMD_POSITION,
};
use crate::point::LocationPoint;
use crate::report::LocationPublisher;
use crate::response::{parse_accuracy_reply, parse_position_reply};
use evaluator::FixEvaluator;

/// Poll period between position queries within an attempt
pub(crate) const ACQUIRE_POLL_PERIOD: Duration = Duration::from_millis(1000);

/// Settling delay after switching antenna power on
pub(crate) const ANTENNA_SETTLE: Duration = Duration::from_millis(100);

/// Reply wait for each position or accuracy query
const QUERY_REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Longest reply text retained for parsing; longer replies are truncated
pub(crate) const REPLY_BUFFER_LIMIT: usize = 256;

/// Outcome of an acquisition attempt, and the externally visible session
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// GNSS is not available, typically because the modem is off
    Unavailable,
    /// The detected modem model cannot run GNSS acquisition
    Unsupported,
    /// No acquisition pending or in progress
    Idle,
    /// An asynchronous acquisition has started
    Acquiring,
    /// A previous acquisition is still in progress
    Pending,
    /// A position was acquired and passed the quality thresholds
    Fixed,
    /// The attempt ran out of fix time
    TimedOut,
}

/// Completion callback for asynchronous acquisition.
pub type AcquireCallback = Box<dyn FnOnce(AcquireOutcome, LocationPoint) + Send>;

/// One dispatched acquisition attempt.
pub(crate) struct AcquireRequest {
    /// Point being filled; handed back with the outcome
    pub point: LocationPoint,
    /// Modem model detected for this attempt
    pub model: ModemModel,
    /// Publish after a successful fix (callback delivery only; the blocking
    /// path publishes from the coordinator)
    pub publish: bool,
    /// Rendezvous for blocking delivery
    pub reply: Option<oneshot::Sender<(AcquireOutcome, LocationPoint)>>,
    /// Completion callback for asynchronous delivery
    pub callback: Option<AcquireCallback>,
}

/// Commands accepted by the worker task.
pub(crate) enum WorkerCommand {
    /// Run one acquisition attempt
    Acquire(AcquireRequest),
    /// Leave the command loop; used at shutdown only
    Exit,
}

/// Truncate a reply line to the retained buffer size without splitting a
/// character.
fn truncate_reply(line: &str) -> &str {
    if line.len() <= REPLY_BUFFER_LIMIT {
        return line;
    }
    let mut end = REPLY_BUFFER_LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// The acquisition worker. Exactly one exists per [`crate::Locator`].
pub(crate) struct Worker {
    commands: mpsc::Receiver<WorkerCommand>,
    transport: Arc<Mutex<Box<dyn ModemTransport>>>,
    antenna: Option<Box<dyn AntennaPower>>,
    publisher: Arc<Mutex<LocationPublisher>>,
    clock: Box<dyn WallClock>,
    config: LocationConfig,
    acquiring: Arc<AtomicBool>,
}

impl Worker {
    /// Spawn the worker on its own task.
    pub fn spawn(
        commands: mpsc::Receiver<WorkerCommand>,
        transport: Arc<Mutex<Box<dyn ModemTransport>>>,
        antenna: Option<Box<dyn AntennaPower>>,
        publisher: Arc<Mutex<LocationPublisher>>,
        clock: Box<dyn WallClock>,
        config: LocationConfig,
        acquiring: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let mut worker = Worker {
            commands,
            transport,
            antenna,
            publisher,
            clock,
            config,
            acquiring,
        };
        tokio::spawn(async move { worker.run().await })
    }

    async fn run(&mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                WorkerCommand::Acquire(request) => self.acquire(request).await,
                WorkerCommand::Exit => break,
            }
        }
        trace!("acquisition worker exiting");
    }

    /// Run one attempt end to end and deliver its outcome. The acquiring flag
    /// and antenna power are released on every exit path.
    async fn acquire(&mut self, mut request: AcquireRequest) {
        self.acquiring.store(true, Ordering::SeqCst);

        if let Some(antenna) = self.antenna.as_mut() {
            antenna.set(true);
            tokio::time::sleep(ANTENNA_SETTLE).await;
        }

        let outcome = self.run_attempt(&mut request.point, request.model).await;

        if let Some(antenna) = self.antenna.as_mut() {
            antenna.set(false);
        }
        self.acquiring.store(false, Ordering::SeqCst);

        self.deliver(request, outcome).await;
    }

    /// The acquisition loop: start GNSS, poll position and accuracy until the
    /// evaluator stops the attempt, stop GNSS.
    async fn run_attempt(
        &mut self,
        point: &mut LocationPoint,
        model: ModemModel,
    ) -> AcquireOutcome {
        info!("started acquisition");

        self.issue(CMD_GNSS_START).await;
        if model.has_accuracy_reports() {
            self.issue(CMD_ENABLE_EPE).await;
        }
        if model.has_constellation_config() {
            self.issue(&constellation_command(self.config.constellation))
                .await;
        }

        let started = tokio::time::Instant::now();
        let mut evaluator = FixEvaluator::new(&self.config);
        let mut outcome = AcquireOutcome::TimedOut;
        let mut powered;

        loop {
            powered = self.transport.lock().await.is_powered();
            if !powered {
                break;
            }
            if evaluator.timed_out(started.elapsed()) {
                break;
            }

            let reply = self.query(CMD_POSITION).await;
            let fault = parse_position_reply(&reply, point);
            if evaluator.note_poll(fault, started.elapsed()) {
                point.system_time = self.clock.now_epoch();
            }

            if model.has_accuracy_reports() {
                let reply = self.query(CMD_ACCURACY).await;
                parse_accuracy_reply(&reply, point);
            }

            // Position and accuracy for this cycle are both in; a settled fix
            // wins over a same-cycle deadline
            if evaluator.settled(fault, point) {
                outcome = AcquireOutcome::Fixed;
                break;
            }

            tokio::time::sleep(ACQUIRE_POLL_PERIOD).await;
        }

        self.issue(CMD_GNSS_STOP).await;

        if !powered && outcome != AcquireOutcome::Fixed {
            outcome = AcquireOutcome::Unavailable;
        }

        if let Some(ttff) = evaluator.time_to_first_fix() {
            point.time_to_first_fix = ttff;
        }

        outcome
    }

    /// Deliver the outcome over the rendezvous channel or the callback,
    /// publishing first on the callback path when requested.
    async fn deliver(&mut self, mut request: AcquireRequest, outcome: AcquireOutcome) {
        if let Some(reply) = request.reply.take() {
            trace!("sending synchronous completion");
            let _ = reply.send((outcome, request.point));
        } else if let Some(callback) = request.callback.take() {
            if request.publish && outcome == AcquireOutcome::Fixed {
                let mut publisher = self.publisher.lock().await;
                if publisher.is_connected() {
                    info!("publishing loc event");
                    match publisher.publish_point(&request.point).await {
                        Ok(true) => {}
                        Ok(false) => warn!("cloud did not accept loc event"),
                        Err(err) => warn!("failed to build loc event: {}", err),
                    }
                }
            }
            trace!("sending asynchronous completion");
            callback(outcome, request.point);
        }
    }

    /// Issue a plain command; transport failures are logged and absorbed.
    async fn issue(&mut self, cmd: &str) {
        let mut transport = self.transport.lock().await;
        if let Err(err) = transport.command(cmd).await {
            warn!("modem command {} failed: {}", cmd, err);
        }
    }

    /// Issue a query, retaining the last data reply line in a bounded buffer.
    /// A transport failure yields whatever text arrived before it; the parser
    /// treats an empty buffer as "no new data this cycle".
    async fn query(&mut self, cmd: &str) -> String {
        let mut reply = String::new();
        let mut transport = self.transport.lock().await;
        let result = transport
            .command_with(cmd, QUERY_REPLY_TIMEOUT, &mut |line| {
                if line.starts_with('+') {
                    reply.clear();
                    reply.push_str(truncate_reply(line));
                }
                LineDisposition::KeepWaiting
            })
            .await;
        drop(transport);

        if let Err(err) = result {
            trace!("query {} failed: {}", cmd, err);
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::mocks::{FixedWallClock, MockAntenna, MockModem};
    use crate::modem::NoCloud;

    const FIX_REPLY: &str =
        "+QGPSLOC: 093021.00,37.77490,-122.41940,1.0,18.3,3,045.30,36.0,19.4,080625,08";
    const NO_FIX_REPLY: &str = "+CME ERROR: 516";

    fn spawn_worker(
        modem: &MockModem,
        antenna: Option<MockAntenna>,
        config: LocationConfig,
    ) -> (mpsc::Sender<WorkerCommand>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(1);
        let acquiring = Arc::new(AtomicBool::new(false));
        let transport: Arc<Mutex<Box<dyn ModemTransport>>> =
            Arc::new(Mutex::new(Box::new(modem.clone())));
        let publisher = Arc::new(Mutex::new(LocationPublisher::new(Box::new(NoCloud))));
        Worker::spawn(
            rx,
            transport,
            antenna.map(|a| Box::new(a) as Box<dyn AntennaPower>),
            publisher,
            Box::new(FixedWallClock(1_750_000_000)),
            config,
            Arc::clone(&acquiring),
        );
        (tx, acquiring)
    }

    async fn run_one(
        tx: &mpsc::Sender<WorkerCommand>,
        model: ModemModel,
    ) -> (AcquireOutcome, LocationPoint) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = AcquireRequest {
            point: LocationPoint::new(),
            model,
            publish: false,
            reply: Some(reply_tx),
            callback: None,
        };
        tx.send(WorkerCommand::Acquire(request)).await.unwrap();
        reply_rx.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_command_sequence_bg95() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY, FIX_REPLY, FIX_REPLY]);
        modem.script_accuracy("+QGPSCFG: \"estimation_error\",4.5,7.25,0.3,1.8");

        let (tx, _) = spawn_worker(&modem, None, LocationConfig::default());
        let (outcome, point) = run_one(&tx, ModemModel::Bg95M5).await;

        assert_eq!(outcome, AcquireOutcome::Fixed);
        assert_eq!(modem.count_sent(CMD_GNSS_START), 1);
        assert_eq!(modem.count_sent(CMD_ENABLE_EPE), 1);
        assert_eq!(modem.count_sent("AT+QGPSCFG=\"gnssconfig\",1"), 1);
        assert_eq!(modem.count_sent(CMD_GNSS_STOP), 1);
        assert!(modem.count_sent(CMD_ACCURACY) >= 1);
        assert_eq!(point.horizontal_accuracy, 4.5);
        assert_eq!(point.vertical_accuracy, 7.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eg91_skips_accuracy_and_constellation() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY, FIX_REPLY, FIX_REPLY]);

        let (tx, _) = spawn_worker(&modem, None, LocationConfig::default());
        let (outcome, point) = run_one(&tx, ModemModel::Eg91).await;

        assert_eq!(outcome, AcquireOutcome::Fixed);
        assert_eq!(modem.count_sent(CMD_ENABLE_EPE), 0);
        assert_eq!(modem.count_sent(CMD_ACCURACY), 0);
        assert_eq!(modem.count_sent("AT+QGPSCFG=\"gnssconfig\",1"), 0);
        assert_eq!(point.horizontal_accuracy, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gnss_stopped_after_timeout() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY]);

        let config = LocationConfig::default().with_maximum_fix_time(3);
        let (tx, _) = spawn_worker(&modem, None, config);
        let (outcome, point) = run_one(&tx, ModemModel::Bg95M5).await;

        assert_eq!(outcome, AcquireOutcome::TimedOut);
        assert_eq!(point.fix, 0);
        assert_eq!(point.time_to_first_fix, 0.0);
        assert_eq!(modem.count_sent(CMD_GNSS_STOP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_antenna_powered_around_attempt() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY, FIX_REPLY, FIX_REPLY]);
        let antenna = MockAntenna::new();
        let transitions = antenna.transitions.clone();

        let (tx, _) = spawn_worker(&modem, Some(antenna), LocationConfig::default());
        let (outcome, _) = run_one(&tx, ModemModel::Bg95M5).await;

        assert_eq!(outcome, AcquireOutcome::Fixed);
        assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_antenna_released_on_power_loss() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY]);
        *modem.power_off_after_polls.lock().unwrap() = Some(2);
        let antenna = MockAntenna::new();
        let transitions = antenna.transitions.clone();

        let (tx, _) = spawn_worker(&modem, Some(antenna), LocationConfig::default());
        let (outcome, _) = run_one(&tx, ModemModel::Bg95M5).await;

        assert_eq!(outcome, AcquireOutcome::Unavailable);
        assert_eq!(*transitions.lock().unwrap(), vec![true, false]);
        // Stop is still issued on the way out
        assert_eq!(modem.count_sent(CMD_GNSS_STOP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fix_snapshots_system_time() {
        let modem = MockModem::new();
        modem.script_positions(&[NO_FIX_REPLY, FIX_REPLY, FIX_REPLY]);

        let (tx, _) = spawn_worker(&modem, None, LocationConfig::default());
        let (outcome, point) = run_one(&tx, ModemModel::Bg95M5).await;

        assert_eq!(outcome, AcquireOutcome::Fixed);
        assert_eq!(point.system_time, 1_750_000_000);
        // First fix landed on the second poll, one poll period in
        assert!((point.time_to_first_fix - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_truncate_reply() {
        let short = "+QGPSLOC: 1,2,3";
        assert_eq!(truncate_reply(short), short);

        let long = "x".repeat(REPLY_BUFFER_LIMIT + 40);
        assert_eq!(truncate_reply(&long).len(), REPLY_BUFFER_LIMIT);

        // Multi-byte characters are never split
        let wide = "é".repeat(REPLY_BUFFER_LIMIT);
        let cut = truncate_reply(&wide);
        assert!(cut.len() <= REPLY_BUFFER_LIMIT);
        assert!(std::str::from_utf8(cut.as_bytes()).is_ok());
    }
}
