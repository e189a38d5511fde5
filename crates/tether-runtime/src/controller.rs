//! Controller: the single owner of session and motion state.
//!
//! One tokio task drains a [`ControlEvent`] queue and is the only writer of
//! the [`SessionMachine`] and the [`MotionPipeline`]. Everything else (CLI,
//! telemetry reader, liveness probes, the periodic drivers) talks to it by
//! enqueueing events, and reads through `watch` channels.
//!
//! The frame and liveness drivers run only while the session is active.
//! They share one [`CancellationToken`]; leaving the active states cancels
//! it and a fresh token is minted on re-entry. Liveness results carry an
//! epoch so a probe issued before a stop cannot count against a later
//! session.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tether_core::config::TetherConfig;
use tether_core::health::HealthMonitor;
use tether_core::input::{DeviceSample, InputRejection};
use tether_core::pipeline::MotionPipeline;
use tether_core::reconcile::TelemetrySnapshot;
use tether_core::session::{
    BusyReason, ConnectionContext, SessionEvent, SessionMachine, SessionState, SessionStatus,
    TransitionOutcome,
};
use tether_core::types::{AntennaSide, InteractionMode, PosePatch, TargetSnapshot};

use crate::dispatcher::{DispatchCounts, DispatchStats, Dispatcher};
use crate::error::{ControlError, LinkError};
use crate::link::RobotLink;

const EVENT_QUEUE_CAPACITY: usize = 256;

// ─── Events ───────────────────────────────────────────────────────

/// The motion command surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    UpdatePose {
        pose: PosePatch,
        continuous: bool,
    },
    UpdateBodyYaw {
        value: f64,
        continuous: bool,
    },
    UpdateAntenna {
        side: AntennaSide,
        value: f64,
        continuous: bool,
    },
    DragEnd,
    ResetToZero,
    Device(DeviceSample),
    DeviceStop,
}

impl MotionCommand {
    /// Commands that end an interaction. These always reach the pipeline so
    /// an interaction cannot be left open by a session change.
    fn is_terminal(&self) -> bool {
        matches!(self, Self::DragEnd | Self::DeviceStop)
    }
}

#[derive(Debug)]
pub enum MotionReply {
    /// Accepted; travels on the throttled stream.
    Streaming,
    /// A force send was issued.
    Forced(JoinHandle<Result<(), LinkError>>),
    /// Nothing to do (e.g. drag end without a drag).
    Ignored,
    Rejected(InputRejection),
    NotAllowed(SessionState),
}

impl MotionReply {
    /// Wait for a force send to complete. Refused commands are errors;
    /// streamed and ignored commands succeed immediately.
    pub async fn confirm(self) -> Result<(), ControlError> {
        match self {
            Self::Streaming | Self::Ignored => Ok(()),
            Self::Forced(handle) => match handle.await {
                Ok(result) => result.map_err(ControlError::from),
                Err(_) => Err(ControlError::Aborted),
            },
            Self::Rejected(rejection) => Err(ControlError::Rejected(rejection)),
            Self::NotAllowed(state) => Err(ControlError::NotAllowed(state)),
        }
    }
}

/// Diagnostic view of the controller internals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub mode: InteractionMode,
    pub current: TargetSnapshot,
    pub target: TargetSnapshot,
    pub rejected_inputs: u64,
    pub adopted_telemetry: u64,
    pub transition_count: u64,
    pub drivers_running: bool,
}

#[derive(Debug)]
pub enum ControlEvent {
    Session {
        event: SessionEvent,
        reply: Option<oneshot::Sender<TransitionOutcome>>,
    },
    ReportHardwareFault(String),
    ClearHardwareFault,
    Motion {
        command: MotionCommand,
        reply: Option<oneshot::Sender<MotionReply>>,
    },
    Telemetry(TelemetrySnapshot),
    FrameTick,
    LivenessTick,
    LivenessResult {
        epoch: u64,
        ok: bool,
    },
    Inspect(oneshot::Sender<ControllerSnapshot>),
    Shutdown,
}

// ─── Controller ───────────────────────────────────────────────────

pub struct Controller {
    config: TetherConfig,
    session: SessionMachine,
    pipeline: MotionPipeline,
    link: Arc<dyn RobotLink>,
    dispatcher: Dispatcher,
    events: mpsc::WeakSender<ControlEvent>,
    status_tx: watch::Sender<SessionStatus>,
    target_tx: watch::Sender<TargetSnapshot>,
    drivers: Option<CancellationToken>,
    liveness_epoch: u64,
    started: Instant,
    last_publish_ms: Option<u64>,
}

impl Controller {
    /// Start the controller task. The task ends on [`ControllerHandle::shutdown`]
    /// or when every handle has been dropped.
    pub fn spawn(
        config: TetherConfig,
        link: Arc<dyn RobotLink>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let session = SessionMachine::new(HealthMonitor::new(config.timing.crash_threshold));
        let (status_tx, status_rx) = watch::channel(session.status());
        let (target_tx, target_rx) = watch::channel(TargetSnapshot::REST);
        let dispatcher = Dispatcher::new(Arc::clone(&link));
        let stats = dispatcher.stats();

        let controller = Self {
            pipeline: MotionPipeline::new(&config),
            config,
            session,
            link,
            dispatcher,
            events: tx.downgrade(),
            status_tx,
            target_tx,
            drivers: None,
            liveness_epoch: 0,
            started: Instant::now(),
            last_publish_ms: None,
        };
        let task = tokio::spawn(controller.run(rx));

        let handle = ControllerHandle {
            tx,
            status_rx,
            target_rx,
            stats,
        };
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ControlEvent>) {
        tracing::debug!("controller started");
        while let Some(event) = rx.recv().await {
            if matches!(event, ControlEvent::Shutdown) {
                break;
            }
            self.handle(event);
        }
        self.stop_drivers();
        tracing::info!("controller stopped");
    }

    fn handle(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Session { event, reply } => {
                let outcome = self.session.apply(event);
                self.after_session_change(&outcome);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            ControlEvent::ReportHardwareFault(detail) => {
                self.session.report_hardware_fault(detail);
                self.publish_status();
            }
            ControlEvent::ClearHardwareFault => {
                self.session.clear_hardware_fault();
                self.publish_status();
            }
            ControlEvent::Motion { command, reply } => {
                let result = self.motion(command);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            ControlEvent::Telemetry(telemetry) => self.telemetry(&telemetry),
            ControlEvent::FrameTick => self.frame(),
            ControlEvent::LivenessTick => self.probe_liveness(),
            ControlEvent::LivenessResult { epoch, ok } => self.liveness_result(epoch, ok),
            ControlEvent::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControlEvent::Shutdown => {}
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    // ── Session ──

    fn after_session_change(&mut self, outcome: &TransitionOutcome) {
        if let TransitionOutcome::Applied(t) = outcome {
            if t.to == SessionState::Disconnected {
                self.pipeline.reset_session();
                let now = self.now_ms();
                self.publish_target(self.pipeline.current(), now);
            }
        }
        self.publish_status();
        match (self.session.is_active(), self.drivers.is_some()) {
            (true, false) => self.start_drivers(),
            (false, true) => self.stop_drivers(),
            _ => {}
        }
    }

    fn liveness_result(&mut self, epoch: u64, ok: bool) {
        if epoch != self.liveness_epoch {
            tracing::debug!(epoch, current = self.liveness_epoch, "stale liveness result dropped");
            return;
        }
        let outcome = if ok {
            self.session.on_liveness_success();
            TransitionOutcome::Unchanged
        } else {
            self.session.on_liveness_failure()
        };
        self.after_session_change(&outcome);
    }

    fn publish_status(&self) {
        let status = self.session.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    // ── Motion ──

    fn motion(&mut self, command: MotionCommand) -> MotionReply {
        let allowed = self.session.accepts_motion();
        if !allowed && !command.is_terminal() {
            tracing::debug!(state = %self.session.state(), ?command, "motion refused");
            return MotionReply::NotAllowed(self.session.state());
        }

        let now = self.now_ms();
        let result = match command {
            MotionCommand::UpdatePose { pose, continuous } => {
                self.pipeline.update_pose(pose, continuous, now)
            }
            MotionCommand::UpdateBodyYaw { value, continuous } => {
                self.pipeline.update_body_yaw(value, continuous, now)
            }
            MotionCommand::UpdateAntenna {
                side,
                value,
                continuous,
            } => self.pipeline.update_antennas(side, value, continuous, now),
            MotionCommand::DragEnd => Ok(self.pipeline.drag_end(now)),
            MotionCommand::ResetToZero => Ok(Some(self.pipeline.reset_to_zero(now))),
            MotionCommand::Device(sample) => {
                self.pipeline.device_input(&sample, now).map(|()| None)
            }
            MotionCommand::DeviceStop => Ok(self.pipeline.device_input_stop(now)),
        };

        match result {
            Err(rejection) => MotionReply::Rejected(rejection),
            Ok(_) if !allowed => MotionReply::NotAllowed(self.session.state()),
            Ok(Some(snapshot)) => {
                self.publish_target(snapshot, now);
                MotionReply::Forced(self.dispatcher.force_send(snapshot))
            }
            Ok(None) if command.is_terminal() => MotionReply::Ignored,
            Ok(None) => MotionReply::Streaming,
        }
    }

    fn telemetry(&mut self, telemetry: &TelemetrySnapshot) {
        if !self.session.is_active() {
            return;
        }
        let now = self.now_ms();
        if self.pipeline.on_telemetry(telemetry, now).is_adopt() {
            self.publish_target(self.pipeline.current(), now);
        }
    }

    fn frame(&mut self) {
        let now = self.now_ms();
        let out = self.pipeline.frame_tick(now, self.session.accepts_motion());
        if let Some(snapshot) = out.send {
            self.dispatcher.send(snapshot);
        }
        let refresh = self.config.timing.ui_refresh_interval_ms;
        let due = self
            .last_publish_ms
            .is_none_or(|last| now.saturating_sub(last) >= refresh);
        if due || out.went_idle {
            self.publish_target(out.current, now);
        }
    }

    fn publish_target(&mut self, snapshot: TargetSnapshot, now_ms: u64) {
        self.last_publish_ms = Some(now_ms);
        self.target_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    // ── Drivers ──

    fn start_drivers(&mut self) {
        let token = CancellationToken::new();
        spawn_driver(
            "frame",
            Duration::from_millis(self.config.timing.frame_interval_ms),
            token.clone(),
            self.events.clone(),
            || ControlEvent::FrameTick,
        );
        spawn_driver(
            "liveness",
            Duration::from_millis(self.config.timing.liveness_interval_ms),
            token.clone(),
            self.events.clone(),
            || ControlEvent::LivenessTick,
        );
        tracing::debug!(state = %self.session.state(), "drivers started");
        self.drivers = Some(token);
    }

    fn stop_drivers(&mut self) {
        if let Some(token) = self.drivers.take() {
            token.cancel();
            self.liveness_epoch += 1;
            tracing::debug!(state = %self.session.state(), "drivers stopped");
        }
    }

    fn probe_liveness(&self) {
        let Some(tx) = self.events.upgrade() else {
            return;
        };
        let link = Arc::clone(&self.link);
        let epoch = self.liveness_epoch;
        let timeout = Duration::from_millis(self.config.link.request_timeout_ms);
        tokio::spawn(async move {
            let ok = match tokio::time::timeout(timeout, link.check_liveness()).await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "liveness check failed");
                    false
                }
                Err(_) => {
                    tracing::debug!("liveness check timed out");
                    false
                }
            };
            let _ = tx.send(ControlEvent::LivenessResult { epoch, ok }).await;
        });
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            mode: self.pipeline.mode(),
            current: self.pipeline.current(),
            target: self.pipeline.target(),
            rejected_inputs: self.pipeline.rejected_inputs(),
            adopted_telemetry: self.pipeline.adopted_telemetry(),
            transition_count: self.session.transition_count(),
            drivers_running: self.drivers.is_some(),
        }
    }
}

/// Periodic event source. Ticks are dropped rather than queued when the
/// controller is behind.
fn spawn_driver(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    events: mpsc::WeakSender<ControlEvent>,
    make_event: fn() -> ControlEvent,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(tx) = events.upgrade() else { break };
                    match tx.try_send(make_event()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::debug!(driver = name, "tick dropped: controller busy");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
        tracing::debug!(driver = name, "driver exited");
    });
}

// ─── Handle ───────────────────────────────────────────────────────

/// Cloneable access to a running [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlEvent>,
    status_rx: watch::Receiver<SessionStatus>,
    target_rx: watch::Receiver<TargetSnapshot>,
    stats: Arc<DispatchStats>,
}

impl ControllerHandle {
    // ── Reads ──

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Smoothed target, refreshed at the UI rate.
    pub fn current_target(&self) -> TargetSnapshot {
        *self.target_rx.borrow()
    }

    pub fn watch_target(&self) -> watch::Receiver<TargetSnapshot> {
        self.target_rx.clone()
    }

    pub fn dispatch_counts(&self) -> DispatchCounts {
        self.stats.counts()
    }

    pub async fn inspect(&self) -> Result<ControllerSnapshot, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::Inspect(reply)).await?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    // ── Session ──

    pub async fn session(&self, event: SessionEvent) -> Result<TransitionOutcome, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::Session {
            event,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn connect(&self, ctx: ConnectionContext) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::Connect(ctx)).await
    }

    pub async fn request_start(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::StartRequested).await
    }

    pub async fn startup_succeeded(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::StartupSucceeded).await
    }

    pub async fn request_stop(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::StopRequested).await
    }

    pub async fn teardown_complete(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::TeardownComplete).await
    }

    /// Stop, then complete the teardown.
    pub async fn disconnect(&self) -> Result<TransitionOutcome, ControlError> {
        self.request_stop().await?;
        self.teardown_complete().await
    }

    pub async fn reconnect(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::Reconnect).await
    }

    pub async fn sleep(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::Sleep).await
    }

    pub async fn wake(&self) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::Wake).await
    }

    pub async fn begin_busy(&self, reason: BusyReason) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::BeginBusy(reason)).await
    }

    pub async fn end_busy(&self, reason: BusyReason) -> Result<TransitionOutcome, ControlError> {
        self.session(SessionEvent::EndBusy(reason)).await
    }

    pub async fn start_app(&self) -> Result<TransitionOutcome, ControlError> {
        self.begin_busy(BusyReason::AppRunning).await
    }

    pub async fn stop_app(&self) -> Result<TransitionOutcome, ControlError> {
        self.end_busy(BusyReason::AppRunning).await
    }

    pub async fn start_command(&self) -> Result<TransitionOutcome, ControlError> {
        self.begin_busy(BusyReason::Command).await
    }

    pub async fn stop_command(&self) -> Result<TransitionOutcome, ControlError> {
        self.end_busy(BusyReason::Command).await
    }

    pub async fn start_install(&self) -> Result<TransitionOutcome, ControlError> {
        self.begin_busy(BusyReason::Installing).await
    }

    pub async fn stop_install(&self) -> Result<TransitionOutcome, ControlError> {
        self.end_busy(BusyReason::Installing).await
    }

    pub async fn report_hardware_fault(&self, detail: impl Into<String>) -> Result<(), ControlError> {
        self.send(ControlEvent::ReportHardwareFault(detail.into())).await
    }

    pub async fn clear_hardware_fault(&self) -> Result<(), ControlError> {
        self.send(ControlEvent::ClearHardwareFault).await
    }

    // ── Motion ──

    pub async fn motion(&self, command: MotionCommand) -> Result<MotionReply, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::Motion {
            command,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn update_pose(
        &self,
        pose: PosePatch,
        continuous: bool,
    ) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::UpdatePose { pose, continuous }).await
    }

    pub async fn update_body_yaw(
        &self,
        value: f64,
        continuous: bool,
    ) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::UpdateBodyYaw { value, continuous }).await
    }

    pub async fn update_antennas(
        &self,
        side: AntennaSide,
        value: f64,
        continuous: bool,
    ) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::UpdateAntenna {
            side,
            value,
            continuous,
        })
        .await
    }

    pub async fn drag_end(&self) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::DragEnd).await
    }

    pub async fn reset_to_zero(&self) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::ResetToZero).await
    }

    pub async fn device_input(&self, sample: DeviceSample) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::Device(sample)).await
    }

    pub async fn device_input_stop(&self) -> Result<MotionReply, ControlError> {
        self.motion(MotionCommand::DeviceStop).await
    }

    // ── Telemetry ──

    /// Enqueue a telemetry sample without waiting. Returns `Ok(false)` when
    /// the sample was dropped because the controller is behind.
    pub fn push_telemetry(&self, telemetry: TelemetrySnapshot) -> Result<bool, ControlError> {
        match self.tx.try_send(ControlEvent::Telemetry(telemetry)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(ControlError::Closed),
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ControlEvent::Shutdown).await;
    }

    async fn send(&self, event: ControlEvent) -> Result<(), ControlError> {
        self.tx.send(event).await.map_err(|_| ControlError::Closed)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
