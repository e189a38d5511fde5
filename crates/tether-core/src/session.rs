//! Session state machine.
//!
//! The single authority on whether the robot is reachable, idle, busy,
//! sleeping or crashed. Every mutation goes through one of the transition
//! methods on [`SessionMachine`]; each either applies one edge of the fixed
//! table ([`is_table_transition`]), reports [`TransitionOutcome::Unchanged`],
//! or refuses with a [`Refusal`]. Refusals are expected races between
//! independent triggers and are never errors.
//!
//! The crash edge is only reachable through the embedded [`HealthMonitor`]
//! via [`SessionMachine::on_liveness_failure`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::health::{HealthMonitor, HealthVerdict};

// ─── Types ────────────────────────────────────────────────────────

/// Why the session is busy. Declaration order is display priority
/// (last wins when several reasons are active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyReason {
    Moving,
    Command,
    AppRunning,
    Installing,
}

impl BusyReason {
    pub const ALL: [Self; 4] = [Self::Moving, Self::Command, Self::AppRunning, Self::Installing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moving => "moving",
            Self::Command => "command",
            Self::AppRunning => "app-running",
            Self::Installing => "installing",
        }
    }
}

/// Session state. `Busy` carries its reason, so a reason exists exactly
/// when the state is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum SessionState {
    #[default]
    Disconnected,
    ReadyToStart,
    Starting,
    Ready,
    Sleeping,
    Busy(BusyReason),
    Stopping,
    Crashed,
}

impl SessionState {
    /// States in which liveness is monitored and the control loops run.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Ready | Self::Busy(_) | Self::Sleeping
        )
    }

    /// States in which user motion commands may be issued.
    pub fn accepts_motion(self) -> bool {
        matches!(self, Self::Ready | Self::Busy(BusyReason::Moving))
    }

    pub fn busy_reason(self) -> Option<BusyReason> {
        match self {
            Self::Busy(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::ReadyToStart => f.write_str("ready-to-start"),
            Self::Starting => f.write_str("starting"),
            Self::Ready => f.write_str("ready"),
            Self::Sleeping => f.write_str("sleeping"),
            Self::Busy(reason) => write!(f, "busy({})", reason.as_str()),
            Self::Stopping => f.write_str("stopping"),
            Self::Crashed => f.write_str("crashed"),
        }
    }
}

/// How the device is reached. Transitions into `ready`/`busy` are refused
/// while no context is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionContext {
    /// USB-attached robot served by a daemon on this machine.
    Local,
    /// Robot reached over the network.
    Remote { host: String },
    /// Simulated robot.
    Simulation,
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote { host } => write!(f, "remote({host})"),
            Self::Simulation => f.write_str("simulation"),
        }
    }
}

/// Lifecycle triggers accepted by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connect(ConnectionContext),
    StartRequested,
    StartupSucceeded,
    BeginBusy(BusyReason),
    EndBusy(BusyReason),
    Sleep,
    Wake,
    StopRequested,
    TeardownComplete,
    Reconnect,
}

/// One applied edge of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Why a transition request was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// No edge for this event from the current state.
    NotInTable {
        from: SessionState,
        event: &'static str,
    },
    /// Sticky hardware fault blocks `ready`.
    HardwareFault,
    /// The session is shutting down.
    Stopping,
    /// No connection context is set.
    NoConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Transition),
    /// The request was valid but changed nothing observable.
    Unchanged,
    Refused(Refusal),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Read-only view handed to UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub state: SessionState,
    pub connection: Option<ConnectionContext>,
    pub hardware_fault: Option<String>,
    pub consecutive_failures: u32,
}

/// Whether `from → to` is an edge of the transition table.
pub fn is_table_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    match (from, to) {
        (Disconnected, ReadyToStart) => true,
        (ReadyToStart, Starting) => true,
        (Starting, Ready) => true,
        (Ready | Busy(_), Busy(_)) => true,
        (Busy(_), Ready) => true,
        (Ready | Busy(_), Sleeping) => true,
        (Sleeping, Ready) => true,
        (Stopping, Disconnected) => true,
        (Crashed, Disconnected) => true,
        (Crashed, Stopping) => false,
        (_, Stopping) => from != Stopping,
        (_, Crashed) => from != Crashed,
        _ => false,
    }
}

// ─── Machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    active_busy: BTreeSet<BusyReason>,
    connection: Option<ConnectionContext>,
    hardware_fault: Option<String>,
    health: HealthMonitor,
    transition_count: u64,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(HealthMonitor::default())
    }
}

impl SessionMachine {
    pub fn new(health: HealthMonitor) -> Self {
        Self {
            state: SessionState::Disconnected,
            active_busy: BTreeSet::new(),
            connection: None,
            hardware_fault: None,
            health,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn busy_reason(&self) -> Option<BusyReason> {
        self.state.busy_reason()
    }

    pub fn connection(&self) -> Option<&ConnectionContext> {
        self.connection.as_ref()
    }

    pub fn hardware_fault(&self) -> Option<&str> {
        self.hardware_fault.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.health.consecutive_failures()
    }

    /// Number of applied transitions since construction.
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn accepts_motion(&self) -> bool {
        self.state.accepts_motion()
    }

    pub fn is_stopping(&self) -> bool {
        self.state == SessionState::Stopping
    }

    pub fn needs_reconnect(&self) -> bool {
        self.state == SessionState::Crashed
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            connection: self.connection.clone(),
            hardware_fault: self.hardware_fault.clone(),
            consecutive_failures: self.health.consecutive_failures(),
        }
    }

    // ── Lifecycle triggers ──

    /// Dispatch a lifecycle event to its transition method.
    pub fn apply(&mut self, event: SessionEvent) -> TransitionOutcome {
        match event {
            SessionEvent::Connect(ctx) => self.connect(ctx),
            SessionEvent::StartRequested => self.request_start(),
            SessionEvent::StartupSucceeded => self.startup_succeeded(),
            SessionEvent::BeginBusy(reason) => self.begin_busy(reason),
            SessionEvent::EndBusy(reason) => self.end_busy(reason),
            SessionEvent::Sleep => self.sleep(),
            SessionEvent::Wake => self.wake(),
            SessionEvent::StopRequested => self.request_stop(),
            SessionEvent::TeardownComplete => self.teardown_complete(),
            SessionEvent::Reconnect => self.reconnect(),
        }
    }

    /// `disconnected → ready-to-start`. Records the connection context and
    /// starts a fresh liveness count.
    pub fn connect(&mut self, ctx: ConnectionContext) -> TransitionOutcome {
        if self.state != SessionState::Disconnected {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "connect",
            });
        }
        self.connection = Some(ctx);
        self.health.reset();
        self.commit(SessionState::ReadyToStart, "connect")
    }

    /// `ready-to-start → starting`.
    pub fn request_start(&mut self) -> TransitionOutcome {
        if self.state != SessionState::ReadyToStart {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "start-requested",
            });
        }
        self.commit(SessionState::Starting, "start-requested")
    }

    /// `starting → ready`. Re-entry from `ready` is an idempotent no-op.
    pub fn startup_succeeded(&mut self) -> TransitionOutcome {
        if self.state == SessionState::Ready {
            return TransitionOutcome::Unchanged;
        }
        if self.is_stopping() {
            return self.refuse(Refusal::Stopping);
        }
        if self.state != SessionState::Starting {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "startup-succeeded",
            });
        }
        if self.hardware_fault.is_some() {
            return self.refuse(Refusal::HardwareFault);
        }
        if self.connection.is_none() {
            return self.refuse(Refusal::NoConnection);
        }
        self.commit(SessionState::Ready, "startup-succeeded")
    }

    /// `ready|busy → busy(reason)`. The shown reason is the highest-priority
    /// active one.
    pub fn begin_busy(&mut self, reason: BusyReason) -> TransitionOutcome {
        if self.is_stopping() {
            return self.refuse(Refusal::Stopping);
        }
        if !matches!(self.state, SessionState::Ready | SessionState::Busy(_)) {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "begin-busy",
            });
        }
        if self.connection.is_none() {
            return self.refuse(Refusal::NoConnection);
        }
        self.active_busy.insert(reason);
        let shown = self.shown_busy_state();
        if shown == self.state {
            return TransitionOutcome::Unchanged;
        }
        self.commit(shown, "begin-busy")
    }

    /// Clear one busy reason. Returns to `ready` only when no other reason
    /// is still active.
    pub fn end_busy(&mut self, reason: BusyReason) -> TransitionOutcome {
        let was_active = self.active_busy.remove(&reason);
        if !self.state.is_busy() {
            if was_active {
                return TransitionOutcome::Unchanged;
            }
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "end-busy",
            });
        }
        if self.connection.is_none() {
            return self.refuse(Refusal::NoConnection);
        }
        let shown = self.shown_busy_state();
        if shown == self.state {
            return TransitionOutcome::Unchanged;
        }
        self.commit(shown, "end-busy")
    }

    /// `ready|busy → sleeping`. Clears every busy reason.
    pub fn sleep(&mut self) -> TransitionOutcome {
        if self.is_stopping() {
            return self.refuse(Refusal::Stopping);
        }
        if !matches!(self.state, SessionState::Ready | SessionState::Busy(_)) {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "sleep",
            });
        }
        if self.connection.is_none() {
            return self.refuse(Refusal::NoConnection);
        }
        self.active_busy.clear();
        self.commit(SessionState::Sleeping, "sleep")
    }

    /// `sleeping → ready` once the wake sequence has completed.
    pub fn wake(&mut self) -> TransitionOutcome {
        if self.state == SessionState::Ready {
            return TransitionOutcome::Unchanged;
        }
        if self.state != SessionState::Sleeping {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "wake",
            });
        }
        if self.connection.is_none() {
            return self.refuse(Refusal::NoConnection);
        }
        self.commit(SessionState::Ready, "wake")
    }

    /// Any non-crashed state → `stopping`. Clears the liveness counter
    /// immediately so a late failure cannot crash an intentional shutdown.
    pub fn request_stop(&mut self) -> TransitionOutcome {
        match self.state {
            SessionState::Stopping => return TransitionOutcome::Unchanged,
            SessionState::Crashed | SessionState::Disconnected => {
                return self.refuse(Refusal::NotInTable {
                    from: self.state,
                    event: "stop-requested",
                });
            }
            _ => {}
        }
        self.health.reset();
        self.active_busy.clear();
        self.commit(SessionState::Stopping, "stop-requested")
    }

    /// `stopping → disconnected`. Drops the connection context.
    pub fn teardown_complete(&mut self) -> TransitionOutcome {
        if self.state != SessionState::Stopping {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "teardown-complete",
            });
        }
        self.clear_session_data();
        self.commit(SessionState::Disconnected, "teardown-complete")
    }

    /// `crashed → disconnected`: the explicit restart after a crash.
    pub fn reconnect(&mut self) -> TransitionOutcome {
        if self.state != SessionState::Crashed {
            return self.refuse(Refusal::NotInTable {
                from: self.state,
                event: "reconnect",
            });
        }
        self.clear_session_data();
        self.commit(SessionState::Disconnected, "reconnect")
    }

    // ── Hardware fault ──

    /// Record a sticky hardware fault that blocks `starting → ready`.
    pub fn report_hardware_fault(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(detail = %detail, "hardware fault reported");
        self.hardware_fault = Some(detail);
    }

    pub fn clear_hardware_fault(&mut self) {
        if self.hardware_fault.take().is_some() {
            tracing::info!("hardware fault cleared");
        }
    }

    // ── Liveness ──

    pub fn on_liveness_success(&mut self) {
        if self.state.is_active() {
            self.health.on_success();
        }
    }

    /// Count a missed liveness check; crosses into `crashed` exactly once
    /// when the threshold is reached. Failures after the crash keep counting.
    /// Ignored in the other inactive states.
    pub fn on_liveness_failure(&mut self) -> TransitionOutcome {
        if !self.state.is_active() && self.state != SessionState::Crashed {
            tracing::debug!(state = %self.state, "liveness failure ignored outside active session");
            return TransitionOutcome::Unchanged;
        }
        match self.health.on_failure() {
            HealthVerdict::Crash if self.state != SessionState::Crashed => {
                self.active_busy.clear();
                let outcome = self.commit(SessionState::Crashed, "liveness-threshold");
                tracing::warn!(
                    failures = self.health.consecutive_failures(),
                    "session crashed: liveness threshold reached"
                );
                outcome
            }
            _ => TransitionOutcome::Unchanged,
        }
    }

    // ── Internal ──

    fn shown_busy_state(&self) -> SessionState {
        match self.active_busy.iter().next_back() {
            Some(reason) => SessionState::Busy(*reason),
            None => SessionState::Ready,
        }
    }

    fn clear_session_data(&mut self) {
        self.connection = None;
        self.active_busy.clear();
        self.health.reset();
    }

    fn commit(&mut self, to: SessionState, event: &'static str) -> TransitionOutcome {
        let from = self.state;
        debug_assert!(
            is_table_transition(from, to),
            "transition {from} -> {to} is not in the table"
        );
        self.state = to;
        self.transition_count += 1;
        tracing::info!(from = %from, to = %to, event, "session transition");
        TransitionOutcome::Applied(Transition { from, to })
    }

    fn refuse(&self, refusal: Refusal) -> TransitionOutcome {
        tracing::debug!(state = %self.state, refusal = ?refusal, "session transition refused");
        TransitionOutcome::Refused(refusal)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
