//! Turns SIGINT / SIGTERM into a shutdown request.  The signal task only calls
//! the handle; teardown itself runs on the orchestrator task.

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::shutdown::{ShutdownHandle, ShutdownRequest};

/// Spawn the bridge.  It keeps listening after the first signal so repeated
/// Ctrl+C presses are absorbed by the gate instead of killing the process
/// mid-teardown.
pub fn spawn(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if !wait_for_signal().await {
                return;
            }
            info!("Signal: termination signal received");
            handle.request(ShutdownRequest::signal());
        }
    })
}

/// Waits for Ctrl+C or SIGTERM.  Returns false if no handler could be
/// installed.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Signal: failed to install SIGTERM handler: {}", e);
                return signal::ctrl_c().await.is_ok();
            }
        };
        tokio::select! {
            res = signal::ctrl_c() => res.is_ok(),
            _ = term.recv() => true,
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Signal: failed to install Ctrl+C handler: {}", e);
                false
            }
        }
    }
}
