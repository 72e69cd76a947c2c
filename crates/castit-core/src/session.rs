/// Session controller: owns the single active device session and turns
/// asynchronous device status into a continue / terminate decision.
///
/// States:
///
/// ```text
///   Idle ──activate──▶ Active ──start_monitoring──▶ Monitoring
///    ▲                                                  │
///    └──────── finish_teardown ◀── Terminating ◀── begin_teardown
/// ```
///
/// The controller itself is a plain state machine; it is driven from exactly
/// one task (the orchestrator loop) which drains the event channel, so the
/// termination decision never runs concurrently with itself.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{CastError, SessionError};
use crate::protocol::{MediaRequest, MediaStatus, PlayerState, StreamType};

// ── collaborator interface ────────────────────────────────────────────────────

/// Everything the casting collaborator pushes at us after setup.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Media status update from the device.
    Status(MediaStatus),
    /// Out-of-band failure; the device is assumed unreliable.
    Error(String),
}

pub type EventSink = mpsc::Sender<SessionEvent>;

/// Capacity of the collaborator → controller channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A connected device with media loaded.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    fn device_name(&self) -> &str;

    /// Whether the device currently reports active playback.
    fn is_playing(&self) -> bool;

    /// Playing or paused, i.e. worth a graceful stop.
    fn is_active(&self) -> bool;

    /// Route status updates into `listener`.  Called at most once per session.
    fn register_status_listener(&self, listener: EventSink);

    async fn stop(&self) -> Result<(), CastError>;

    /// Disconnect / quit the receiver app.
    async fn quit(&self) -> Result<(), CastError>;
}

/// Device lookup + playback start.
#[async_trait]
pub trait CastBackend: Send + Sync {
    /// Find `device_name`, load `media` and start playback.
    ///
    /// Discovery must stop promptly once `discovery` is cancelled.  Errors that
    /// happen later, outside of status updates, are reported on `errors`.
    async fn connect_and_play(
        &self,
        device_name: &str,
        media: &MediaRequest,
        discovery: CancellationToken,
        errors: EventSink,
    ) -> Result<Arc<dyn DeviceSession>, CastError>;
}

// ── decision table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Terminate,
    /// Event arrived with no active session.
    Discard,
}

/// Terminate when playback has ended (device not playing and idle/unknown),
/// or when a live stream is paused (it cannot be resumed where it left off).
pub fn decide(device_playing: bool, status: &MediaStatus) -> Decision {
    let ended = !device_playing
        && matches!(status.player_state, PlayerState::Idle | PlayerState::Unknown);
    let live_paused =
        status.stream_type == StreamType::Live && status.player_state == PlayerState::Paused;
    if ended || live_paused {
        Decision::Terminate
    } else {
        Decision::Continue
    }
}

// ── controller ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Monitoring,
    Terminating,
}

pub struct Session {
    pub device: Arc<dyn DeviceSession>,
    pub listener_registered: bool,
    pub started_at: DateTime<Local>,
}

impl Session {
    pub fn new(device: Arc<dyn DeviceSession>) -> Self {
        Self {
            device,
            listener_registered: false,
            started_at: Local::now(),
        }
    }
}

pub struct SessionController {
    state: SessionState,
    session: Option<Session>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// `Idle → Active`.  A second session is refused.
    pub fn activate(&mut self, device: Arc<dyn DeviceSession>) -> Result<(), SessionError> {
        if let Some(existing) = &self.session {
            return Err(SessionError::AlreadyActive(
                existing.device.device_name().to_string(),
            ));
        }
        info!("Session: active on '{}'", device.device_name());
        self.session = Some(Session::new(device));
        self.state = SessionState::Active;
        Ok(())
    }

    /// `Active → Monitoring`.  Attaches the status listener once; later calls
    /// return false and do nothing.
    pub fn start_monitoring(&mut self, listener: EventSink) -> bool {
        let Some(session) = self.session.as_mut() else {
            debug!("Session: start_monitoring with no session");
            return false;
        };
        if session.listener_registered {
            return false;
        }
        session.device.register_status_listener(listener);
        session.listener_registered = true;
        self.state = SessionState::Monitoring;
        debug!("Session: status listener attached");
        true
    }

    /// Evaluate one status event against the active session.
    pub fn on_status(&self, status: &MediaStatus) -> Decision {
        let Some(session) = self.session.as_ref() else {
            debug!(
                "Session: discarding stale status {} / {}",
                status.player_state, status.stream_type
            );
            return Decision::Discard;
        };
        let playing = session.device.is_playing();
        let decision = decide(playing, status);
        debug!(
            "Session: status player_state={} stream_type={} idle_reason={:?} playing={} → {:?}",
            status.player_state, status.stream_type, status.idle_reason, playing, decision
        );
        decision
    }

    /// Clear the session before any teardown call that may fail, so events
    /// racing with teardown see no active session.
    pub fn begin_teardown(&mut self) -> Option<Session> {
        self.state = SessionState::Terminating;
        self.session.take()
    }

    pub fn finish_teardown(&mut self) {
        self.session = None;
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct StubDevice {
        pub playing: AtomicBool,
        pub listeners: AtomicUsize,
    }

    impl StubDevice {
        pub(crate) fn new(playing: bool) -> Arc<Self> {
            Arc::new(Self {
                playing: AtomicBool::new(playing),
                listeners: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DeviceSession for StubDevice {
        fn device_name(&self) -> &str {
            "Living Room"
        }
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
        fn is_active(&self) -> bool {
            self.is_playing()
        }
        fn register_status_listener(&self, _listener: EventSink) {
            self.listeners.fetch_add(1, Ordering::SeqCst);
        }
        async fn stop(&self) -> Result<(), CastError> {
            Ok(())
        }
        async fn quit(&self) -> Result<(), CastError> {
            Ok(())
        }
    }

    fn status(state: PlayerState, stream: StreamType) -> MediaStatus {
        MediaStatus::new(state, stream)
    }

    #[test]
    fn test_decision_table() {
        use PlayerState::*;
        use StreamType::{Buffered, Live};

        assert_eq!(decide(false, &status(Idle, Buffered)), Decision::Terminate);
        assert_eq!(decide(false, &status(Unknown, Buffered)), Decision::Terminate);
        assert_eq!(decide(true, &status(Playing, Buffered)), Decision::Continue);
        assert_eq!(decide(false, &status(Playing, Buffered)), Decision::Continue);
        assert_eq!(decide(true, &status(Paused, Live)), Decision::Terminate);
        assert_eq!(decide(false, &status(Paused, Live)), Decision::Terminate);
        assert_eq!(decide(false, &status(Paused, Buffered)), Decision::Continue);
        assert_eq!(decide(false, &status(Buffering, Live)), Decision::Continue);
        // Idle reported while the device still believes it is playing.
        assert_eq!(decide(true, &status(Idle, Buffered)), Decision::Continue);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut ctl = SessionController::new();
        assert_eq!(ctl.state(), SessionState::Idle);

        let device = StubDevice::new(true);
        ctl.activate(device.clone()).unwrap();
        assert_eq!(ctl.state(), SessionState::Active);

        let (tx, _rx) = mpsc::channel(4);
        assert!(ctl.start_monitoring(tx.clone()));
        assert!(!ctl.start_monitoring(tx));
        assert_eq!(device.listeners.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.state(), SessionState::Monitoring);
        assert!(ctl.session().unwrap().listener_registered);

        let taken = ctl.begin_teardown();
        assert!(taken.is_some());
        assert_eq!(ctl.state(), SessionState::Terminating);
        assert!(!ctl.has_session());

        ctl.finish_teardown();
        assert_eq!(ctl.state(), SessionState::Idle);
    }

    #[test]
    fn test_second_session_is_refused() {
        let mut ctl = SessionController::new();
        ctl.activate(StubDevice::new(true)).unwrap();
        let err = ctl.activate(StubDevice::new(true)).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive(name) if name == "Living Room"));
    }

    #[test]
    fn test_stale_status_is_discarded() {
        let mut ctl = SessionController::new();
        ctl.activate(StubDevice::new(false)).unwrap();
        let _ = ctl.begin_teardown();

        let decision = ctl.on_status(&status(PlayerState::Idle, StreamType::Buffered));
        assert_eq!(decision, Decision::Discard);
        assert_eq!(ctl.state(), SessionState::Terminating);
    }

    #[test]
    fn test_on_status_uses_device_playing_flag() {
        let mut ctl = SessionController::new();
        let device = StubDevice::new(true);
        ctl.activate(device.clone()).unwrap();

        let idle = status(PlayerState::Idle, StreamType::Buffered);
        assert_eq!(ctl.on_status(&idle), Decision::Continue);
        device.playing.store(false, Ordering::SeqCst);
        assert_eq!(ctl.on_status(&idle), Decision::Terminate);
    }
}
