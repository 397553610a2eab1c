//! Process-level helpers for the CLI backend.

use std::ffi::OsStr;
use std::path::Path;

use sysinfo::System;
use tracing::{debug, info};

use crate::config::ProcessPriority;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
fn priority_class(priority: ProcessPriority) -> u32 {
    match priority {
        ProcessPriority::Realtime => 0x0000_0100,
        ProcessPriority::High => 0x0000_0080,
        ProcessPriority::AboveNormal => 0x0000_8000,
        ProcessPriority::Normal => 0x0000_0020,
        ProcessPriority::BelowNormal => 0x0000_4000,
        ProcessPriority::Low => 0x0000_0040,
    }
}

/// Apply creation flags for priority and window visibility.
///
/// On Unix both are handled after spawn, see [`apply_priority`].
#[allow(unused_variables)]
pub(crate) fn configure_command(
    cmd: &mut tokio::process::Command,
    priority: ProcessPriority,
    minimized: bool,
) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        let mut flags = priority_class(priority);
        if minimized {
            flags |= CREATE_NO_WINDOW;
        }
        cmd.as_std_mut().creation_flags(flags);
    }
}

/// Best-effort renice of a freshly spawned child.
#[allow(unused_variables)]
pub(crate) async fn apply_priority(pid: u32, priority: ProcessPriority) {
    #[cfg(unix)]
    {
        let nice = priority.nice_value();
        if nice == 0 {
            return;
        }
        let result = tokio::process::Command::new("renice")
            .arg("-n")
            .arg(nice.to_string())
            .arg("-p")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(pid, nice, "engine reniced"),
            Ok(status) => debug!(pid, nice, %status, "renice refused"),
            Err(e) => debug!(pid, nice, error = %e, "renice unavailable"),
        }
    }
}

/// Kill every running process that shares the engine executable's name.
///
/// Catches encoders left behind by a previous crash or by a killed parent
/// whose child ignored the signal. Returns how many processes were signalled.
pub fn sweep_orphan_processes(cli_path: &Path) -> usize {
    let Some(stem) = cli_path.file_stem() else {
        return 0;
    };
    let file_name = cli_path.file_name().unwrap_or(stem);

    let system = System::new_all();
    let mut killed = 0;
    for (pid, process) in system.processes() {
        let name = process.name();
        if name == stem || name == file_name {
            if process.kill() {
                killed += 1;
                info!(pid = %pid, name = ?OsStr::new(name), "killed orphaned engine process");
            }
        }
    }
    killed
}
