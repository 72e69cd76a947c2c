/// Play-mode control flow.
///
/// ```text
///   Orchestrator::run()
///     ├── FileServer::start()            (local media only)
///     ├── CastBackend::connect_and_play  ← raced against shutdown requests
///     │     (shutdown first: cancel discovery, let connect settle, tear
///     │      down whatever session it produced)
///     ├── SessionController::activate / start_monitoring
///     └── loop
///           ├── shutdown_rx  → ShutdownCoordinator::execute → exit code
///           └── events_rx    → Status → decide → maybe request(PlaybackEnded)
///                              Error  → request(DeviceError)
/// ```
///
/// The orchestrator task is the only owner of the session controller and the
/// shutdown coordinator; every other context talks to it through channels.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::CastError;
use crate::protocol::{MediaKind, MediaRequest};
use crate::session::{
    CastBackend, Decision, DeviceSession, SessionController, SessionEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::shutdown::{
    ShutdownCoordinator, ShutdownHandle, ShutdownReceiver, ShutdownRequest,
};

/// How long a connect still in flight may take to settle once shutdown wins.
const SETUP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub device_name: String,
    pub bind_address: String,
    pub serve_port: u16,
}

enum Setup {
    Shutdown(ShutdownRequest),
    Connected(Result<Arc<dyn DeviceSession>, CastError>),
}

enum Next {
    Shutdown(ShutdownRequest),
    Event(SessionEvent),
}

pub struct Orchestrator {
    backend: Arc<dyn CastBackend>,
    shutdown: ShutdownHandle,
    shutdown_rx: ShutdownReceiver,
    controller: SessionController,
    coordinator: ShutdownCoordinator,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CastBackend>,
        shutdown: ShutdownHandle,
        shutdown_rx: ShutdownReceiver,
    ) -> Self {
        let coordinator = ShutdownCoordinator::new(shutdown.gate().clone());
        Self {
            backend,
            shutdown,
            shutdown_rx,
            controller: SessionController::new(),
            coordinator,
        }
    }

    /// Cast `media` and supervise the session.  Returns the exit code once
    /// teardown has completed.
    pub async fn run(mut self, media: &MediaRequest, opts: &PlayOptions) -> i32 {
        if let MediaKind::LocalFile { root, file_name } = &media.kind {
            let started = self
                .coordinator
                .server_mut()
                .start(&opts.bind_address, opts.serve_port, root, file_name)
                .await;
            if let Err(e) = started {
                error!("Cast: cannot expose local media: {}", e);
                return 1;
            }
        }

        let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);

        info!(
            "Cast: looking for '{}' to play {}",
            opts.device_name, media.resolved_uri
        );
        let backend = self.backend.clone();
        let discovery = self.coordinator.discovery_token();
        let connect = backend.connect_and_play(
            &opts.device_name,
            media,
            discovery.clone(),
            events_tx.clone(),
        );
        tokio::pin!(connect);

        let setup = tokio::select! {
            biased;
            Some(req) = self.shutdown_rx.recv() => Setup::Shutdown(req),
            res = &mut connect => Setup::Connected(res),
        };

        let device = match setup {
            Setup::Shutdown(req) => {
                info!("Cast: shutdown requested during setup");
                // A connect that already loaded media must still be stopped.
                discovery.cancel();
                match tokio::time::timeout(SETUP_DRAIN_TIMEOUT, &mut connect).await {
                    Ok(Ok(device)) => {
                        debug!("Cast: '{}' connected during shutdown", device.device_name());
                        if let Err(e) = self.controller.activate(device) {
                            warn!("Cast: {}", e);
                        }
                    }
                    Ok(Err(e)) => debug!("Cast: setup ended by shutdown: {}", e),
                    Err(_) => warn!(
                        "Cast: setup did not finish within {:?}, abandoning it",
                        SETUP_DRAIN_TIMEOUT
                    ),
                }
                return self.teardown(req).await;
            }
            Setup::Connected(Err(e)) => {
                error!("Cast: {}", e);
                return self.fail_setup().await;
            }
            Setup::Connected(Ok(device)) => device,
        };

        if let Err(e) = self.controller.activate(device) {
            error!("Cast: {}", e);
            return self.fail_setup().await;
        }
        self.controller.start_monitoring(events_tx.clone());
        info!("Cast: playing '{}' on '{}'", media.title, opts.device_name);

        let req = loop {
            let next = tokio::select! {
                biased;
                Some(req) = self.shutdown_rx.recv() => Next::Shutdown(req),
                Some(ev) = events_rx.recv() => Next::Event(ev),
            };

            match next {
                Next::Shutdown(req) => break req,
                Next::Event(SessionEvent::Status(status)) => {
                    if self.controller.on_status(&status) == Decision::Terminate {
                        match status.current_time {
                            Some(at) => info!(
                                "Cast: playback finished ({} / {}) at {:.1}s",
                                status.player_state, status.stream_type, at
                            ),
                            None => info!(
                                "Cast: playback finished ({} / {})",
                                status.player_state, status.stream_type
                            ),
                        }
                        self.shutdown.request(ShutdownRequest::playback_ended());
                    }
                }
                Next::Event(SessionEvent::Error(msg)) => {
                    if self.controller.has_session() {
                        error!("Cast: device error: {}", msg);
                        self.shutdown.request(ShutdownRequest::device_error());
                    } else {
                        debug!("Cast: device error after teardown ignored: {}", msg);
                    }
                }
            }
        };

        self.teardown(req).await
    }

    /// Setup failed after resources may have been acquired.  Whoever wins the
    /// gate, the exit code stays non-zero.
    async fn fail_setup(&mut self) -> i32 {
        self.shutdown.request(ShutdownRequest::setup_failed());
        let code = match self.shutdown_rx.recv().await {
            Some(req) => self.teardown(req).await,
            None => 1,
        };
        code.max(1)
    }

    async fn teardown(&mut self, req: ShutdownRequest) -> i32 {
        self.coordinator.execute(req, &mut self.controller).await
    }
}
