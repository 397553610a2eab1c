//! What to do once the queue has drained.

use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::PostQueueAction;

#[derive(Debug, Error)]
pub enum PostActionError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },
}

/// The system command for `action` on this platform.
///
/// `None` and `QuitApplication` have no command; quitting is left to the
/// caller.
pub fn action_command(action: PostQueueAction) -> Option<(&'static str, Vec<&'static str>)> {
    platform_command(action)
}

#[cfg(windows)]
fn platform_command(action: PostQueueAction) -> Option<(&'static str, Vec<&'static str>)> {
    match action {
        PostQueueAction::Shutdown => Some(("shutdown", vec!["-s", "-t", "60"])),
        PostQueueAction::LogOff => Some(("shutdown", vec!["-l"])),
        PostQueueAction::Suspend => {
            Some(("rundll32.exe", vec!["powrprof.dll,SetSuspendState", "0,1,0"]))
        }
        PostQueueAction::Hibernate => Some(("shutdown", vec!["/h"])),
        PostQueueAction::LockSystem => Some(("rundll32.exe", vec!["user32.dll,LockWorkStation"])),
        PostQueueAction::None | PostQueueAction::QuitApplication => None,
    }
}

#[cfg(target_os = "macos")]
fn platform_command(action: PostQueueAction) -> Option<(&'static str, Vec<&'static str>)> {
    match action {
        PostQueueAction::Shutdown => Some(("shutdown", vec!["-h", "+1"])),
        PostQueueAction::LogOff => Some((
            "osascript",
            vec!["-e", "tell application \"System Events\" to log out"],
        )),
        PostQueueAction::Suspend | PostQueueAction::Hibernate => Some(("pmset", vec!["sleepnow"])),
        PostQueueAction::LockSystem => Some(("pmset", vec!["displaysleepnow"])),
        PostQueueAction::None | PostQueueAction::QuitApplication => None,
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_command(action: PostQueueAction) -> Option<(&'static str, Vec<&'static str>)> {
    match action {
        PostQueueAction::Shutdown => Some(("shutdown", vec!["-h", "+1"])),
        PostQueueAction::LogOff => Some(("loginctl", vec!["terminate-session", "self"])),
        PostQueueAction::Suspend => Some(("systemctl", vec!["suspend"])),
        PostQueueAction::Hibernate => Some(("systemctl", vec!["hibernate"])),
        PostQueueAction::LockSystem => Some(("loginctl", vec!["lock-session"])),
        PostQueueAction::None | PostQueueAction::QuitApplication => None,
    }
}

/// Run the configured action. Actions without a command succeed immediately.
pub async fn perform_post_queue_action(action: PostQueueAction) -> Result<(), PostActionError> {
    let Some((program, args)) = action_command(action) else {
        return Ok(());
    };
    let command = format!("{} {}", program, args.join(" "));
    info!(?action, %command, "running post-queue action");

    let status = Command::new(program)
        .args(&args)
        .status()
        .await
        .map_err(|source| PostActionError::Spawn {
            command: command.clone(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(PostActionError::Failed { command, status })
    }
}
