//! `sysinfo`-backed process table for `--quit`.

use castit_core::reaper::{ProcessInfo, ProcessTable};
use sysinfo::{Pid, Signal, System};
use tracing::debug;

pub struct SysinfoTable {
    system: System,
    own_pid: Option<Pid>,
    exe_name: String,
}

impl SysinfoTable {
    pub fn new(exe_name: impl Into<String>) -> Self {
        Self {
            system: System::new(),
            own_pid: sysinfo::get_current_pid().ok(),
            exe_name: exe_name.into(),
        }
    }
}

/// Process names are truncated on Linux and carry `.exe` on Windows.
fn is_same_program(process_name: &str, exe_name: &str) -> bool {
    let name = process_name.strip_suffix(".exe").unwrap_or(process_name);
    name == exe_name
}

impl ProcessTable for SysinfoTable {
    fn find_siblings(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes();
        let mut found: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != self.own_pid)
            .filter(|(_, p)| is_same_program(p.name(), &self.exe_name))
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                name: p.name().to_string(),
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        debug!("Reaper: {} sibling(s) named '{}'", found.len(), self.exe_name);
        found
    }

    fn terminate(&mut self, pid: u32) -> bool {
        match self.system.process(Pid::from_u32(pid)) {
            // No SIGTERM on this platform: fall back to a hard kill.
            Some(p) => p.kill_with(Signal::Term).unwrap_or_else(|| p.kill()),
            None => false,
        }
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .map(|p| p.kill())
            .unwrap_or(false)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.system.refresh_process(Pid::from_u32(pid))
    }
}
