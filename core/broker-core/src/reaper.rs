//! OS process helpers for forceful cleanup.
//!
//! Only used when an application instance no longer answers automation
//! calls and has to be killed by process name.

use sysinfo::System;
use tracing::{debug, warn};

/// Pids of running processes whose name matches `name` (case-insensitive).
pub fn find_processes(name: &str) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .iter()
        .filter(|(_, process)| process.name().eq_ignore_ascii_case(name))
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

/// Kills every process named `name`. Returns how many were signalled.
pub fn kill_processes(name: &str) -> usize {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        if !process.name().eq_ignore_ascii_case(name) {
            continue;
        }
        if process.kill() {
            debug!(pid = pid.as_u32(), name, "Killed stray process");
            killed += 1;
        } else {
            warn!(pid = pid.as_u32(), name, "Failed to kill stray process");
        }
    }
    killed
}
