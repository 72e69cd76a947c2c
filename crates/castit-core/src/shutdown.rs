/// Shutdown coordination: the one exit path every trigger funnels through.
///
/// ```text
///   signal task ─┐
///   device error ─┼─▶ ShutdownHandle::request()  ── CAS NotStarted→InProgress
///   status event ─┤          │ (winner only)
///   setup failure ┘          ▼
///                     unbounded channel ──▶ orchestrator loop
///                                              └─ ShutdownCoordinator::execute()
/// ```
///
/// Triggers never touch the session or server themselves; they only win (or
/// lose) the gate and enqueue.  Teardown runs on the orchestrator task, which
/// owns every resource it tears down.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::FileServer;
use crate::session::SessionController;

/// Upper bound for each graceful device step.
const DEVICE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

// ── gate ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    NotStarted,
    InProgress,
    Done,
}

const NOT_STARTED: u8 = 0;
const IN_PROGRESS: u8 = 1;
const DONE: u8 = 2;

/// Single-assignment flag guarding teardown.  Transitions are monotonic.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    state: AtomicU8,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => ShutdownState::NotStarted,
            IN_PROGRESS => ShutdownState::InProgress,
            _ => ShutdownState::Done,
        }
    }

    /// Atomically move `NotStarted → InProgress`.  Exactly one caller per
    /// process ever gets `true`.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(NOT_STARTED, IN_PROGRESS, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `InProgress → Done`.
    pub fn finish(&self) {
        let _ = self
            .state
            .compare_exchange(IN_PROGRESS, DONE, Ordering::AcqRel, Ordering::Acquire);
    }
}

// ── requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    PlaybackEnded,
    DeviceError,
    SetupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    pub exit_code: i32,
    /// Skip the graceful device stop/quit.
    pub force: bool,
    pub reason: ShutdownReason,
}

impl ShutdownRequest {
    pub fn signal() -> Self {
        Self {
            exit_code: 0,
            force: false,
            reason: ShutdownReason::Signal,
        }
    }

    pub fn playback_ended() -> Self {
        Self {
            exit_code: 0,
            force: false,
            reason: ShutdownReason::PlaybackEnded,
        }
    }

    pub fn device_error() -> Self {
        Self {
            exit_code: 1,
            force: true,
            reason: ShutdownReason::DeviceError,
        }
    }

    pub fn setup_failed() -> Self {
        Self {
            exit_code: 1,
            force: true,
            reason: ShutdownReason::SetupFailed,
        }
    }
}

pub type ShutdownReceiver = mpsc::UnboundedReceiver<ShutdownRequest>;

/// Cloneable entry point handed to every trigger.
#[derive(Clone)]
pub struct ShutdownHandle {
    gate: Arc<ShutdownGate>,
    tx: mpsc::UnboundedSender<ShutdownRequest>,
}

impl ShutdownHandle {
    pub fn channel() -> (Self, ShutdownReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                gate: Arc::new(ShutdownGate::new()),
                tx,
            },
            rx,
        )
    }

    /// Request shutdown.  Returns true if this call won the gate; every later
    /// call is a no-op.
    pub fn request(&self, req: ShutdownRequest) -> bool {
        if !self.gate.try_begin() {
            debug!("Shutdown: {:?} ignored, already {:?}", req.reason, self.gate.state());
            return false;
        }
        info!(
            "Shutdown: requested ({:?}, exit_code={}, force={})",
            req.reason, req.exit_code, req.force
        );
        // Receiver only disappears once teardown has already run.
        let _ = self.tx.send(req);
        true
    }

    pub fn gate(&self) -> &Arc<ShutdownGate> {
        &self.gate
    }

    pub fn state(&self) -> ShutdownState {
        self.gate.state()
    }
}

// ── coordinator ───────────────────────────────────────────────────────────────

/// Owns the resources teardown releases: the discovery token and the file
/// server.  The session lives in the [`SessionController`].
pub struct ShutdownCoordinator {
    gate: Arc<ShutdownGate>,
    discovery: CancellationToken,
    server: FileServer,
}

impl ShutdownCoordinator {
    pub fn new(gate: Arc<ShutdownGate>) -> Self {
        Self {
            gate,
            discovery: CancellationToken::new(),
            server: FileServer::new(),
        }
    }

    /// Token handed to the collaborator for the device scan.
    pub fn discovery_token(&self) -> CancellationToken {
        self.discovery.clone()
    }

    pub fn server_mut(&mut self) -> &mut FileServer {
        &mut self.server
    }

    /// Run the teardown sequence for a request that has already won the gate.
    /// Returns the process exit code.
    pub async fn execute(
        &mut self,
        req: ShutdownRequest,
        controller: &mut SessionController,
    ) -> i32 {
        if self.gate.state() != ShutdownState::InProgress {
            warn!("Shutdown: execute called without holding the gate, ignoring");
            return req.exit_code;
        }

        // Pending device scan.
        self.discovery.cancel();

        // Clear before any call that may fail.
        let session = controller.begin_teardown();

        if let Some(session) = &session {
            let device = &session.device;
            if req.force {
                info!(
                    "Shutdown: skipping graceful stop on '{}' (forced)",
                    device.device_name()
                );
            } else if device.is_active() {
                info!("Shutdown: stopping playback on '{}'", device.device_name());
                match tokio::time::timeout(DEVICE_STEP_TIMEOUT, device.stop()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Shutdown: stop failed: {}", e),
                    Err(_) => warn!("Shutdown: stop timed out"),
                }
                match tokio::time::timeout(DEVICE_STEP_TIMEOUT, device.quit()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Shutdown: quit failed: {}", e),
                    Err(_) => warn!("Shutdown: quit timed out"),
                }
            } else {
                debug!("Shutdown: device not active, nothing to stop");
            }
        }

        let elapsed = session.as_ref().map(|s| Local::now() - s.started_at);
        drop(session);
        controller.finish_teardown();

        // Device first: it may still be pulling bytes mid-disconnect.
        self.server.stop().await;

        self.gate.finish();
        match elapsed {
            Some(d) => info!(
                "Shutdown: complete after {}s of playback (exit {})",
                d.num_seconds(),
                req.exit_code
            ),
            None => info!("Shutdown: complete (exit {})", req.exit_code),
        }
        req.exit_code
    }
}
