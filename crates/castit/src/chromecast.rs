/// Google Cast backend built on `rust_cast`.
///
/// Architecture:
///
/// ```text
///   ChromecastBackend::connect_and_play()
///         │
///         ├── discover()      ← mDNS browse on a blocking thread, cancellable
///         └── cast worker     ← std thread that owns the playback connection
///                 ├── connect / launch DefaultMediaReceiver / load  → ready oneshot
///                 └── loop receive()
///                       ├── heartbeat ping        → pong
///                       ├── media status          → SessionEvent::Status
///                       ├── close / read error    → SessionEvent::Error
///                       └── session dropped       → stop_app unless quit already ran
///
///   ChromecastSession::stop() / quit()
///         └── control connection  ← fresh CastDevice on a blocking task
/// ```
///
/// `rust_cast` reads block until the device sends something, so stop and quit
/// do not go through the worker.  They open a second connection, which the
/// receiver accepts like any other sender.
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use castit_core::error::CastError;
use castit_core::protocol::{MediaKind, MediaRequest, MediaStatus, PlayerState, StreamType};
use castit_core::session::{CastBackend, DeviceSession, EventSink, SessionEvent};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use rust_cast::channels::connection::ConnectionResponse;
use rust_cast::channels::heartbeat::HeartbeatResponse;
use rust_cast::channels::media::{self as cast_media, Media, MediaResponse};
use rust_cast::channels::receiver::CastDeviceApp;
use rust_cast::{CastDevice, ChannelMessage};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";
const DISCOVERY_POLL: Duration = Duration::from_millis(250);
const DEFAULT_DESTINATION_ID: &str = "receiver-0";

// ── discovery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastTarget {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

fn instance_name_from_fullname(fullname: &str) -> &str {
    fullname
        .strip_suffix(CAST_SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}

fn target_from_resolved(service: &mdns_sd::ResolvedService) -> Option<CastTarget> {
    let mut v4: Vec<Ipv4Addr> = service.get_addresses_v4().iter().copied().collect();
    v4.sort();
    let address = IpAddr::V4(*v4.first()?);
    let name = service
        .get_property_val_str("fn")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| instance_name_from_fullname(service.get_fullname()))
        .to_string();
    Some(CastTarget {
        name,
        address,
        port: service.get_port(),
    })
}

fn name_matches(wanted: &str, found: &str) -> bool {
    wanted.trim().eq_ignore_ascii_case(found.trim())
}

/// Time left before `deadline`, capped at one poll.  `None` once it has passed.
fn next_wait(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            (!left.is_zero()).then(|| left.min(DISCOVERY_POLL))
        }
        None => Some(DISCOVERY_POLL),
    }
}

/// Browse until `device_name` shows up, `timeout` passes or `cancel` fires.
fn browse_for(
    device_name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CastTarget, CastError> {
    let mdns = ServiceDaemon::new()
        .map_err(|e| CastError::Device(format!("mDNS daemon failed to start: {}", e)))?;
    let receiver = match mdns.browse(CAST_SERVICE_TYPE) {
        Ok(r) => r,
        Err(e) => {
            let _ = mdns.shutdown();
            return Err(CastError::Device(format!("mDNS browse failed: {}", e)));
        }
    };

    // An unrepresentable deadline browses until found or cancelled.
    let deadline = Instant::now().checked_add(timeout);
    let mut result = Err(CastError::DeviceNotFound(device_name.to_string()));
    while let Some(wait) = next_wait(deadline) {
        if cancel.is_cancelled() {
            result = Err(CastError::DiscoveryCancelled);
            break;
        }
        let Ok(event) = receiver.recv_timeout(wait) else {
            continue;
        };
        if let ServiceEvent::ServiceResolved(service) = event {
            let Some(target) = target_from_resolved(&service) else {
                continue;
            };
            debug!("Cast: found '{}' at {}:{}", target.name, target.address, target.port);
            if name_matches(device_name, &target.name) {
                result = Ok(target);
                break;
            }
        }
    }

    if let Err(e) = mdns.stop_browse(CAST_SERVICE_TYPE) {
        debug!("Cast: failed to stop mDNS browse cleanly: {}", e);
    }
    let _ = mdns.shutdown();
    result
}

async fn discover(
    device_name: &str,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<CastTarget, CastError> {
    let name = device_name.to_string();
    let token = cancel.clone();
    let browse = tokio::task::spawn_blocking(move || browse_for(&name, timeout, &token));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CastError::DiscoveryCancelled),
        joined = browse => joined
            .map_err(|e| CastError::Device(format!("discovery task failed: {}", e)))?,
    }
}

// ── status mapping ────────────────────────────────────────────────────────────

fn player_state(state: &cast_media::PlayerState) -> PlayerState {
    match state {
        cast_media::PlayerState::Playing => PlayerState::Playing,
        cast_media::PlayerState::Buffering => PlayerState::Buffering,
        cast_media::PlayerState::Paused => PlayerState::Paused,
        cast_media::PlayerState::Idle => PlayerState::Idle,
        #[allow(unreachable_patterns)]
        _ => PlayerState::Unknown,
    }
}

fn stream_type(stream: &cast_media::StreamType) -> StreamType {
    match stream {
        cast_media::StreamType::Buffered => StreamType::Buffered,
        cast_media::StreamType::Live => StreamType::Live,
        _ => StreamType::Unknown,
    }
}

/// An idle report without a reason is the receiver still loading; only a
/// reasoned idle ends playback.
fn next_playing(previous: bool, state: PlayerState, idle_reason: Option<&str>) -> bool {
    match state {
        PlayerState::Playing | PlayerState::Buffering => true,
        PlayerState::Paused | PlayerState::Unknown => false,
        PlayerState::Idle => previous && idle_reason.is_none(),
    }
}

// ── session ───────────────────────────────────────────────────────────────────

/// Receiver-side identifiers of the running playback.
#[derive(Debug, Clone)]
struct PlaybackIds {
    transport_id: String,
    session_id: String,
    media_session_id: Option<i32>,
}

struct Shared {
    playing: AtomicBool,
    active: AtomicBool,
    /// Set once quit is under way; the app closing after that is expected.
    quitting: AtomicBool,
    ids: Mutex<Option<PlaybackIds>>,
    listener: Mutex<Option<EventSink>>,
    errors: EventSink,
}

impl Shared {
    fn ids(&self) -> Option<PlaybackIds> {
        match self.ids.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_ids(&self, ids: PlaybackIds) {
        match self.ids.lock() {
            Ok(mut guard) => *guard = Some(ids),
            Err(poisoned) => *poisoned.into_inner() = Some(ids),
        }
    }

    fn emit_status(&self, status: MediaStatus) {
        let listener = match self.listener.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match listener {
            Some(tx) => {
                let _ = tx.blocking_send(SessionEvent::Status(status));
            }
            None => debug!("Cast: status before listener attached: {}", status.player_state),
        }
    }

    fn emit_error(&self, msg: String) {
        if self.quitting.load(Ordering::SeqCst) {
            debug!("Cast: {} (after quit)", msg);
            return;
        }
        warn!("Cast: {}", msg);
        let _ = self.errors.blocking_send(SessionEvent::Error(msg));
    }
}

/// Run `command` on a fresh connection to `target`.
async fn control<F>(target: &CastTarget, step: &'static str, command: F) -> Result<(), CastError>
where
    F: FnOnce(&CastDevice<'_>) -> Result<(), String> + Send + 'static,
{
    let address = target.address.to_string();
    let port = target.port;
    tokio::task::spawn_blocking(move || {
        let device = CastDevice::connect_without_host_verification(address, port)
            .map_err(|e| device_err(step, e))?;
        device
            .connection
            .connect(DEFAULT_DESTINATION_ID)
            .map_err(|e| device_err(step, e))?;
        command(&device).map_err(|e| device_err(step, e))
    })
    .await
    .map_err(|e| device_err(step, e))?
}

pub struct ChromecastSession {
    name: String,
    target: CastTarget,
    shared: Arc<Shared>,
    /// Dropping the session disconnects this; the worker then closes the app.
    _owner: std_mpsc::SyncSender<()>,
}

#[async_trait]
impl DeviceSession for ChromecastSession {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn register_status_listener(&self, listener: EventSink) {
        match self.shared.listener.lock() {
            Ok(mut guard) => *guard = Some(listener),
            Err(poisoned) => *poisoned.into_inner() = Some(listener),
        }
    }

    async fn stop(&self) -> Result<(), CastError> {
        let result = match self.shared.ids() {
            Some(PlaybackIds {
                transport_id,
                media_session_id: Some(id),
                ..
            }) => {
                control(&self.target, "stop", move |device| {
                    device
                        .connection
                        .connect(transport_id.clone())
                        .map_err(|e| e.to_string())?;
                    device
                        .media
                        .stop(transport_id, id)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .await
            }
            _ => Ok(()),
        };
        self.shared.playing.store(false, Ordering::SeqCst);
        result
    }

    async fn quit(&self) -> Result<(), CastError> {
        self.shared.quitting.store(true, Ordering::SeqCst);
        let result = match self.shared.ids() {
            Some(ids) => {
                let session_id = ids.session_id;
                control(&self.target, "quit", move |device| {
                    device
                        .receiver
                        .stop_app(session_id)
                        .map_err(|e| e.to_string())
                })
                .await
            }
            None => Ok(()),
        };
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.active.store(false, Ordering::SeqCst);
        result
    }
}

// ── worker ────────────────────────────────────────────────────────────────────

fn device_err(step: &str, e: impl std::fmt::Display) -> CastError {
    CastError::Device(format!("{}: {}", step, e))
}

fn start_playback(device: &CastDevice, media: &MediaRequest) -> Result<PlaybackIds, CastError> {
    device
        .connection
        .connect(DEFAULT_DESTINATION_ID)
        .map_err(|e| device_err("connect", e))?;
    device.heartbeat.ping().map_err(|e| device_err("ping", e))?;

    let app = device
        .receiver
        .launch_app(&CastDeviceApp::DefaultMediaReceiver)
        .map_err(|e| CastError::PlaybackStart(format!("launch receiver app: {}", e)))?;
    device
        .connection
        .connect(app.transport_id.clone())
        .map_err(|e| device_err("connect to app", e))?;

    let load = Media {
        content_id: media.resolved_uri.clone(),
        content_type: media.content_type.clone(),
        stream_type: cast_media::StreamType::Buffered,
        duration: None,
        metadata: None,
    };
    let status = device
        .media
        .load(app.transport_id.clone(), app.session_id.clone(), &load)
        .map_err(|e| CastError::PlaybackStart(e.to_string()))?;
    let media_session_id = status.entries.first().map(|e| e.media_session_id);

    if let Some(volume) = media.volume {
        if let Err(e) = device.receiver.set_volume(volume) {
            warn!("Cast: failed to set volume {}: {}", volume, e);
        }
    }
    if !media.autoplay {
        if let Some(id) = media_session_id {
            if let Err(e) = device.media.pause(app.transport_id.clone(), id) {
                warn!("Cast: failed to pause after load: {}", e);
            }
        }
    }

    Ok(PlaybackIds {
        transport_id: app.transport_id,
        session_id: app.session_id,
        media_session_id,
    })
}

fn run_worker(
    target: CastTarget,
    media: MediaRequest,
    shared: Arc<Shared>,
    owner: std_mpsc::Receiver<()>,
    ready: oneshot::Sender<Result<(), CastError>>,
) {
    let device = match CastDevice::connect_without_host_verification(
        target.address.to_string(),
        target.port,
    ) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready.send(Err(device_err("connect", e)));
            return;
        }
    };

    let mut ids = match start_playback(&device, &media) {
        Ok(ids) => ids,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    shared.set_ids(ids.clone());
    shared.playing.store(media.autoplay, Ordering::SeqCst);
    shared.active.store(true, Ordering::SeqCst);
    if ready.send(Ok(())).is_err() {
        debug!("Cast: setup abandoned, closing receiver app");
        let _ = device.receiver.stop_app(ids.session_id.clone());
        return;
    }

    let mut stream = StreamType::Buffered;
    loop {
        if let Err(std_mpsc::TryRecvError::Disconnected) = owner.try_recv() {
            if !shared.quitting.load(Ordering::SeqCst) {
                debug!("Cast: session dropped without quit, closing receiver app");
                if let Err(e) = device.receiver.stop_app(ids.session_id.clone()) {
                    debug!("Cast: closing receiver app failed: {}", e);
                }
            }
            break;
        }

        match device.receive() {
            Ok(ChannelMessage::Heartbeat(HeartbeatResponse::Ping)) => {
                if let Err(e) = device.heartbeat.pong() {
                    shared.emit_error(format!("heartbeat failed: {}", e));
                    break;
                }
            }
            Ok(ChannelMessage::Media(MediaResponse::Status(status))) => {
                if status.entries.is_empty() {
                    shared.playing.store(false, Ordering::SeqCst);
                    shared.emit_status(MediaStatus::new(PlayerState::Unknown, stream));
                }
                for entry in &status.entries {
                    if ids.media_session_id != Some(entry.media_session_id) {
                        ids.media_session_id = Some(entry.media_session_id);
                        shared.set_ids(ids.clone());
                    }
                    if let Some(m) = &entry.media {
                        stream = stream_type(&m.stream_type);
                    }
                    let state = player_state(&entry.player_state);
                    let idle_reason = entry.idle_reason.as_ref().map(|r| format!("{:?}", r));
                    let playing = next_playing(
                        shared.playing.load(Ordering::SeqCst),
                        state,
                        idle_reason.as_deref(),
                    );
                    shared.playing.store(playing, Ordering::SeqCst);
                    shared
                        .active
                        .store(playing || state == PlayerState::Paused, Ordering::SeqCst);
                    shared.emit_status(MediaStatus {
                        player_state: state,
                        stream_type: stream,
                        idle_reason,
                        current_time: entry.current_time.map(f64::from),
                    });
                }
            }
            Ok(ChannelMessage::Connection(ConnectionResponse::Close)) => {
                shared.emit_error("receiver closed the connection".to_string());
                break;
            }
            Ok(_) => {}
            Err(e) => {
                shared.emit_error(format!("connection lost: {}", e));
                break;
            }
        }
    }
    debug!("Cast: worker for '{}' exited", target.name);
}

// ── backend ───────────────────────────────────────────────────────────────────

pub struct ChromecastBackend {
    discovery_timeout: Duration,
}

impl ChromecastBackend {
    pub fn new(discovery_timeout: Duration) -> Self {
        Self { discovery_timeout }
    }
}

#[async_trait]
impl CastBackend for ChromecastBackend {
    async fn connect_and_play(
        &self,
        device_name: &str,
        media: &MediaRequest,
        discovery: CancellationToken,
        errors: EventSink,
    ) -> Result<Arc<dyn DeviceSession>, CastError> {
        if media.kind == MediaKind::StreamingService {
            return Err(CastError::Unsupported(format!(
                "{} (streaming-service playback needs an authorized client)",
                media.raw_uri
            )));
        }

        let target = discover(device_name, self.discovery_timeout, discovery).await?;
        info!(
            "Cast: connecting to '{}' at {}:{}",
            target.name, target.address, target.port
        );

        let shared = Arc::new(Shared {
            playing: AtomicBool::new(false),
            active: AtomicBool::new(false),
            quitting: AtomicBool::new(false),
            ids: Mutex::new(None),
            listener: Mutex::new(None),
            errors,
        });
        let (owner_tx, owner_rx) = std_mpsc::sync_channel(0);
        let (ready_tx, ready_rx) = oneshot::channel();

        let name = target.name.clone();
        let worker_target = target.clone();
        let worker_shared = shared.clone();
        let worker_media = media.clone();
        std::thread::Builder::new()
            .name("cast-worker".to_string())
            .spawn(move || run_worker(worker_target, worker_media, worker_shared, owner_rx, ready_tx))
            .map_err(|e| device_err("spawn worker", e))?;

        ready_rx.await.map_err(|_| CastError::Disconnected)??;
        info!("Cast: media loaded on '{}'", name);

        Ok(Arc::new(ChromecastSession {
            name,
            target,
            shared,
            _owner: owner_tx,
        }))
    }
}
