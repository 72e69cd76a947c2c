/// Ephemeral HTTP file server for local media.
///
/// Serves exactly one path, `GET /<basename>`, from the media's directory for
/// the lifetime of a casting session.  The device is pointed at
/// `http://<lan-ip>:<port>/<basename>` by the resolver.
///
/// Design notes
/// ─────────────
/// • The listener is bound in `start()` so a busy port is reported to the
///   caller as a setup error; accepting and serving then runs on a spawned
///   tokio task and never blocks the control flow.
/// • `ServeFile` answers Range requests.  Cast devices drop and re-open the
///   connection on every seek; those disconnects end inside hyper's
///   per-connection task and never reach us.
/// • `stop()` signals graceful shutdown, gives in-flight transfers a moment,
///   then aborts the task so the socket is always released.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ServerError;

const STOP_GRACE: Duration = Duration::from_millis(500);

/// Snapshot of the running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    pub port: u16,
    pub root_directory: PathBuf,
    pub running: bool,
}

struct RunningServer {
    addr: SocketAddr,
    root: PathBuf,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct FileServer {
    running: Option<RunningServer>,
}

/// Router exposing a single file under its percent-encoded basename.
pub fn router(root: &Path, file_name: &str) -> Router {
    let route = format!("/{}", urlencoding::encode(file_name));
    Router::new()
        .route_service(&route, ServeFile::new(root.join(file_name)))
        .layer(TraceLayer::new_for_http())
}

impl FileServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn handle(&self) -> Option<ServerHandle> {
        self.running.as_ref().map(|r| ServerHandle {
            port: r.addr.port(),
            root_directory: r.root.clone(),
            running: !r.task.is_finished(),
        })
    }

    /// Bind `bind_address:port` and start serving `root/file_name`.
    /// Returns the bound address (useful with port 0).
    pub async fn start(
        &mut self,
        bind_address: &str,
        port: u16,
        root: &Path,
        file_name: &str,
    ) -> Result<SocketAddr, ServerError> {
        if let Some(r) = &self.running {
            return Err(ServerError::AlreadyRunning(r.addr.port()));
        }

        let addr = format!("{}:{}", bind_address, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let app = router(root, file_name);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        info!(
            "FileServer: serving {} on http://{}/{}",
            root.join(file_name).display(),
            local,
            urlencoding::encode(file_name)
        );

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!("FileServer: serve loop ended with error: {}", e);
            }
            debug!("FileServer: serve loop exited");
        });

        self.running = Some(RunningServer {
            addr: local,
            root: root.to_path_buf(),
            shutdown_tx,
            task,
        });
        Ok(local)
    }

    /// Release the socket and the background task.  No-op when not running.
    pub async fn stop(&mut self) {
        let Some(server) = self.running.take() else {
            debug!("FileServer: stop requested but not running");
            return;
        };

        let _ = server.shutdown_tx.send(());
        let mut task = server.task;
        if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
            debug!("FileServer: transfers still open, aborting serve task");
            task.abort();
            let _ = task.await;
        }
        info!("FileServer: stopped (port {})", server.addr.port());
    }
}
