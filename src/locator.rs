//! # Session Coordinator
//!
//! The caller-facing surface of the acquisition engine. Serializes concurrent
//! requests into a single in-flight acquisition, dispatches to the worker
//! task and delivers results back either synchronously or through a
//! completion callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::acquire::{
    AcquireOutcome, AcquireRequest, Worker, WorkerCommand, ACQUIRE_POLL_PERIOD,
};
use crate::config::LocationConfig;
use crate::error::Result;
use crate::modem::{
    constellation_command, AntennaPower, CloudLink, ModemDetect, ModemModel, ModemTransport,
    SystemWallClock,
};
use crate::point::LocationPoint;
use crate::report::LocationPublisher;

/// GNSS acquisition engine.
///
/// One explicitly constructed instance per application; at most one
/// acquisition attempt is in flight at any time, enforced structurally by a
/// capacity-1 dispatch channel in front of a single worker task. A second
/// request arriving while one is active is rejected with
/// [`AcquireOutcome::Pending`], never queued.
pub struct Locator {
    commands: mpsc::Sender<WorkerCommand>,
    acquiring: Arc<AtomicBool>,
    transport: Arc<Mutex<Box<dyn ModemTransport>>>,
    detector: Mutex<Box<dyn ModemDetect>>,
    model: Mutex<ModemModel>,
    publisher: Arc<Mutex<LocationPublisher>>,
    config: LocationConfig,
    worker: JoinHandle<()>,
}

impl Locator {
    /// Build the engine and spawn its worker task.
    ///
    /// When the modem is already powered, model detection runs immediately
    /// and, for a model that takes one, the constellation configuration is
    /// applied. Otherwise detection is retried on the first acquisition after
    /// the modem comes up.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration fails validation.
    pub async fn new(
        config: LocationConfig,
        transport: impl ModemTransport + 'static,
        detector: impl ModemDetect + 'static,
        antenna: Option<Box<dyn AntennaPower>>,
        cloud: impl CloudLink + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();

        info!("beginning location engine");
        let transport: Arc<Mutex<Box<dyn ModemTransport>>> =
            Arc::new(Mutex::new(Box::new(transport)));
        let publisher = Arc::new(Mutex::new(LocationPublisher::new(Box::new(cloud))));
        let acquiring = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::channel(1);

        let worker = Worker::spawn(
            command_rx,
            Arc::clone(&transport),
            antenna,
            Arc::clone(&publisher),
            Box::new(SystemWallClock),
            config.clone(),
            Arc::clone(&acquiring),
        );

        let locator = Self {
            commands,
            acquiring,
            transport,
            detector: Mutex::new(Box::new(detector)),
            model: Mutex::new(ModemModel::Unavailable),
            publisher,
            config,
            worker,
        };

        if locator.transport.lock().await.is_powered() {
            info!("detecting modem model");
            let model = locator.detect_model().await;
            if model.has_constellation_config() {
                locator.configure_constellation().await;
            }
        }

        Ok(locator)
    }

    /// Acquire a position synchronously.
    ///
    /// Blocks the caller until the attempt finishes or the bounded wait (the
    /// configured maximum fix time plus one poll period of slack) expires, in
    /// which case [`AcquireOutcome::Idle`] comes back and the point is left
    /// untouched. On a [`AcquireOutcome::Fixed`] outcome with `publish` set
    /// and cloud connectivity present, the location event is published before
    /// returning.
    pub async fn acquire(&self, point: &mut LocationPoint, publish: bool) -> AcquireOutcome {
        let model = match self.preflight().await {
            Ok(model) => model,
            Err(outcome) => return outcome,
        };

        trace!("starting synchronous acquisition");
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = AcquireRequest {
            point: point.clone(),
            model,
            publish: false,
            reply: Some(reply_tx),
            callback: None,
        };
        if !self.dispatch(request) {
            return AcquireOutcome::Pending;
        }

        let wait = Duration::from_secs(self.config.max_fix_seconds) + ACQUIRE_POLL_PERIOD;
        let outcome = match tokio::time::timeout(wait, reply_rx).await {
            Ok(Ok((outcome, acquired))) => {
                *point = acquired;
                outcome
            }
            _ => AcquireOutcome::Idle,
        };

        if publish && outcome == AcquireOutcome::Fixed {
            let mut publisher = self.publisher.lock().await;
            if publisher.is_connected() {
                info!("publishing loc event");
                match publisher.publish_point(point).await {
                    Ok(true) => {}
                    Ok(false) => warn!("cloud did not accept loc event"),
                    Err(err) => warn!("failed to build loc event: {}", err),
                }
            }
        }

        outcome
    }

    /// Start an acquisition and return immediately.
    ///
    /// On [`AcquireOutcome::Acquiring`], `callback` fires exactly once on the
    /// worker task with the final outcome and the filled point; any requested
    /// publish happens before the callback.
    pub async fn acquire_with_callback(
        &self,
        point: LocationPoint,
        callback: impl FnOnce(AcquireOutcome, LocationPoint) + Send + 'static,
        publish: bool,
    ) -> AcquireOutcome {
        let model = match self.preflight().await {
            Ok(model) => model,
            Err(outcome) => return outcome,
        };

        trace!("starting asynchronous acquisition");
        let request = AcquireRequest {
            point,
            model,
            publish,
            reply: None,
            callback: Some(Box::new(callback)),
        };
        if !self.dispatch(request) {
            return AcquireOutcome::Pending;
        }

        AcquireOutcome::Acquiring
    }

    /// Current session status: [`AcquireOutcome::Acquiring`] while an attempt
    /// is in flight, [`AcquireOutcome::Idle`] otherwise. Safe to call
    /// concurrently with everything else.
    pub fn status(&self) -> AcquireOutcome {
        if self.acquiring.load(Ordering::SeqCst) {
            AcquireOutcome::Acquiring
        } else {
            AcquireOutcome::Idle
        }
    }

    /// Request sequence number the next accepted publish will carry.
    pub async fn request_sequence(&self) -> u32 {
        self.publisher.lock().await.request_sequence()
    }

    /// Stop the worker task. An attempt already dispatched runs to completion
    /// first; do not call while a blocking acquisition is still waiting.
    pub async fn shutdown(self) {
        let _ = self.commands.send(WorkerCommand::Exit).await;
        let _ = self.worker.await;
    }

    /// Common preconditions for both acquisition surfaces: modem powered,
    /// model supported, nothing in flight. Claims the in-flight slot on
    /// success.
    async fn preflight(&self) -> std::result::Result<ModemModel, AcquireOutcome> {
        if !self.transport.lock().await.is_powered() {
            trace!("modem is not on");
            return Err(AcquireOutcome::Unavailable);
        }

        let model = self.detect_model().await;
        if !model.is_supported() {
            trace!("modem is not supported");
            return Err(AcquireOutcome::Unsupported);
        }

        if self
            .acquiring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("acquisition is already underway");
            return Err(AcquireOutcome::Pending);
        }

        Ok(model)
    }

    /// Hand a claimed request to the worker. Returns false, releasing the
    /// claim, if the dispatch slot is unexpectedly occupied.
    fn dispatch(&self, request: AcquireRequest) -> bool {
        if self
            .commands
            .try_send(WorkerCommand::Acquire(request))
            .is_err()
        {
            self.acquiring.store(false, Ordering::SeqCst);
            trace!("acquisition is already underway");
            return false;
        }
        true
    }

    /// Run model detection if it has not succeeded yet; an
    /// [`ModemModel::Unavailable`] result is retried on the next call.
    async fn detect_model(&self) -> ModemModel {
        let mut model = self.model.lock().await;
        if *model == ModemModel::Unavailable {
            let detected = self.detector.lock().await.detect();
            trace!("modem model detection: {:?}", detected);
            *model = detected;
        }
        *model
    }

    async fn configure_constellation(&self) {
        let command = constellation_command(self.config.constellation);
        if let Err(err) = self.transport.lock().await.command(&command).await {
            warn!("constellation configuration failed: {}", err);
        }
    }
}
