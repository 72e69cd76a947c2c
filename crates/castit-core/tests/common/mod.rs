//! Scripted cast backend for driving the orchestrator without a device.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use castit_core::error::CastError;
use castit_core::protocol::{MediaKind, MediaRequest, MediaStatus};
use castit_core::session::{CastBackend, DeviceSession, EventSink, SessionEvent};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct FakeDevice {
    pub playing: AtomicBool,
    pub active: AtomicBool,
    pub stops: AtomicUsize,
    pub quits: AtomicUsize,
    /// Dialled from `quit()` to check the file server is still up.
    pub server_addr: Mutex<Option<SocketAddr>>,
    pub server_up_during_quit: AtomicBool,
    /// Makes `stop()` fail after counting the call.
    pub fail_stop: AtomicBool,
    listener: Mutex<Option<EventSink>>,
    attached: Notify,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            playing: AtomicBool::new(true),
            active: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
            server_addr: Mutex::new(None),
            server_up_during_quit: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            listener: Mutex::new(None),
            attached: Notify::new(),
        })
    }

    /// Resolves once the orchestrator has attached its status listener.
    pub async fn wait_attached(&self) -> EventSink {
        loop {
            if let Some(tx) = self.listener.lock().unwrap().clone() {
                return tx;
            }
            self.attached.notified().await;
        }
    }

    pub async fn push_status(&self, status: MediaStatus) {
        let tx = self.wait_attached().await;
        let _ = tx.send(SessionEvent::Status(status)).await;
    }

    pub async fn push_error(&self, msg: &str) {
        let tx = self.wait_attached().await;
        let _ = tx.send(SessionEvent::Error(msg.to_string())).await;
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn quit_count(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceSession for FakeDevice {
    fn device_name(&self) -> &str {
        "Living Room"
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn register_status_listener(&self, listener: EventSink) {
        *self.listener.lock().unwrap() = Some(listener);
        self.attached.notify_one();
    }

    async fn stop(&self) -> Result<(), CastError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(CastError::Device("stop: INVALID_MEDIA_SESSION_ID".to_string()));
        }
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn quit(&self) -> Result<(), CastError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        let server_addr = *self.server_addr.lock().unwrap();
        if let Some(addr) = server_addr {
            let up = tokio::net::TcpStream::connect(addr).await.is_ok();
            self.server_up_during_quit.store(up, Ordering::SeqCst);
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub enum Script {
    Connect(Arc<FakeDevice>),
    Fail,
    /// Connects once `release` is notified.
    Gated {
        device: Arc<FakeDevice>,
        release: Arc<Notify>,
    },
    /// Never finds the device; waits for discovery to be cancelled.
    Hang,
}

pub struct FakeBackend {
    script: Script,
    pub discovery_cancelled: Arc<AtomicBool>,
    pub connects: AtomicUsize,
}

impl FakeBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            discovery_cancelled: Arc::new(AtomicBool::new(false)),
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CastBackend for FakeBackend {
    async fn connect_and_play(
        &self,
        device_name: &str,
        _media: &MediaRequest,
        discovery: CancellationToken,
        _errors: EventSink,
    ) -> Result<Arc<dyn DeviceSession>, CastError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Connect(device) => Ok(device.clone()),
            Script::Fail => Err(CastError::PlaybackStart("LOAD_FAILED".to_string())),
            Script::Gated { device, release } => {
                release.notified().await;
                Ok(device.clone())
            }
            Script::Hang => {
                let flag = self.discovery_cancelled.clone();
                let watcher = discovery.clone();
                tokio::spawn(async move {
                    watcher.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                });
                discovery.cancelled().await;
                Err(CastError::DeviceNotFound(device_name.to_string()))
            }
        }
    }
}

pub fn remote_media() -> MediaRequest {
    MediaRequest {
        raw_uri: "https://example.com/clip.mp4".to_string(),
        resolved_uri: "https://example.com/clip.mp4".to_string(),
        title: "clip.mp4".to_string(),
        content_type: "video/mp4".to_string(),
        autoplay: true,
        volume: None,
        kind: MediaKind::Remote,
    }
}

pub fn local_media(dir: &Path, file_name: &str, port: u16) -> MediaRequest {
    std::fs::write(dir.join(file_name), b"not really audio").unwrap();
    let url = format!("http://127.0.0.1:{}/{}", port, file_name);
    MediaRequest {
        raw_uri: dir.join(file_name).display().to_string(),
        resolved_uri: url,
        title: file_name.to_string(),
        content_type: "audio/mpeg".to_string(),
        autoplay: true,
        volume: Some(0.5),
        kind: MediaKind::LocalFile {
            root: dir.to_path_buf(),
            file_name: file_name.to_string(),
        },
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);
