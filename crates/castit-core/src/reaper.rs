//! Instance reaper for `--quit`: asks sibling instances to terminate, waits a
//! grace period, then force-kills whatever is left.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One external process matched as a sibling instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// OS process access used by the reaper.
pub trait ProcessTable {
    /// Instances of this tool other than the calling process, in pid order.
    fn find_siblings(&mut self) -> Vec<ProcessInfo>;

    /// Graceful termination request (SIGTERM).  Returns false if it could not
    /// be delivered.
    fn terminate(&mut self, pid: u32) -> bool;

    /// Forceful kill (SIGKILL).
    fn kill(&mut self, pid: u32) -> bool;

    fn is_alive(&mut self, pid: u32) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub found: usize,
    pub graceful: usize,
    pub forced: usize,
}

impl ReapReport {
    pub fn is_noop(&self) -> bool {
        self.found == 0
    }
}

/// Stop every process in `set`.  Returns as soon as all have exited, or after
/// `grace` has elapsed and the stragglers were killed.
pub async fn reap<T: ProcessTable + ?Sized>(
    table: &mut T,
    set: &[ProcessInfo],
    grace: Duration,
    poll: Duration,
) -> ReapReport {
    if set.is_empty() {
        info!("Reaper: no other running instances");
        return ReapReport::default();
    }

    for p in set {
        info!("Reaper: terminating {} (pid {})", p.name, p.pid);
        if !table.terminate(p.pid) {
            warn!("Reaper: could not signal pid {}", p.pid);
        }
    }

    // No representable deadline: wait for the processes themselves.
    let deadline = Instant::now().checked_add(grace);
    let mut alive: Vec<u32> = set.iter().map(|p| p.pid).collect();
    loop {
        alive.retain(|pid| table.is_alive(*pid));
        if alive.is_empty() {
            break;
        }
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                poll.min(deadline - now)
            }
            None => poll,
        };
        tokio::time::sleep(wait).await;
    }

    let mut forced = 0;
    for pid in &alive {
        warn!("Reaper: pid {} ignored SIGTERM, killing", pid);
        if table.kill(*pid) {
            forced += 1;
        } else {
            debug!("Reaper: kill failed for pid {} (already gone?)", pid);
        }
    }

    let report = ReapReport {
        found: set.len(),
        graceful: set.len() - alive.len(),
        forced,
    };
    info!(
        "Reaper: stopped {} instance(s), {} gracefully, {} forcefully",
        report.found, report.graceful, report.forced
    );
    report
}
