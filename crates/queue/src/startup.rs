//! Preflight checks run before a queue is started.
//!
//! - The configured engine can be launched (`--version` succeeds)
//! - The log directory can be created

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::{Config, EngineBackend};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encoder not available: {0}")]
    EngineUnavailable(String),

    #[error("Library backend selected but no native encoder is linked")]
    NativeEngineMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pull the version out of `--version` output.
///
/// Accepts release builds (`HandBrake 1.6.1`) and snapshot builds
/// (`HandBrake 20231102191238-a0f7f7d-master`).
pub fn parse_engine_version(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("HandBrake "))
        .filter_map(|rest| rest.split_whitespace().next())
        .find(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Run `<cli_path> --version` and return the reported version.
pub async fn check_engine_available(cli_path: &Path) -> Result<String, StartupError> {
    let output = Command::new(cli_path)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            StartupError::EngineUnavailable(format!(
                "{} --version failed; is it installed and in PATH? Error: {}",
                cli_path.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::EngineUnavailable(format!(
            "{} --version exited with {}",
            cli_path.display(),
            output.status
        )));
    }

    // some builds print the banner on stderr
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    parse_engine_version(&stdout)
        .or_else(|| parse_engine_version(&stderr))
        .ok_or_else(|| {
            StartupError::EngineUnavailable(format!(
                "could not read a version from {} --version",
                cli_path.display()
            ))
        })
}

/// Run all preflight checks for `cfg`.
///
/// Returns the engine version when the CLI backend is selected.
pub async fn run_startup_checks(
    cfg: &Config,
    native_linked: bool,
) -> Result<Option<String>, StartupError> {
    tokio::fs::create_dir_all(&cfg.logging.log_dir).await?;

    match cfg.engine.backend {
        EngineBackend::Cli => {
            let version = check_engine_available(&cfg.engine.cli_path).await?;
            info!(%version, path = %cfg.engine.cli_path.display(), "encoder found");
            Ok(Some(version))
        }
        EngineBackend::Library if native_linked => Ok(None),
        EngineBackend::Library => Err(StartupError::NativeEngineMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_release_versions_parse(major in 0u32..3, minor in 0u32..20, patch in 0u32..10) {
            let output = format!(
                "[12:00:00] Compile-time hardening features are enabled\nHandBrake {}.{}.{}\n",
                major, minor, patch
            );
            prop_assert_eq!(
                parse_engine_version(&output),
                Some(format!("{}.{}.{}", major, minor, patch))
            );
        }

        #[test]
        fn prop_unrelated_output_has_no_version(s in "[a-z ]{0,40}") {
            prop_assert_eq!(parse_engine_version(&s), None);
        }
    }

    #[test]
    fn test_snapshot_version() {
        assert_eq!(
            parse_engine_version("HandBrake 20231102191238-a0f7f7d-master\n"),
            Some("20231102191238-a0f7f7d-master".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_runs_without_blocking_the_runtime() {
        // runs to completion but prints no HandBrake banner
        let result = check_engine_available(Path::new("echo")).await;
        assert!(matches!(result, Err(StartupError::EngineUnavailable(_))));
    }

    #[test]
    fn test_banner_without_version_is_rejected() {
        assert_eq!(parse_engine_version("HandBrake has exited.\n"), None);
    }

    #[tokio::test]
    async fn test_missing_engine_is_unavailable() {
        let result = check_engine_available(Path::new("/nonexistent/HandBrakeCLI")).await;
        assert!(matches!(result, Err(StartupError::EngineUnavailable(_))));
    }

    #[tokio::test]
    async fn test_library_backend_requires_native_engine() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.logging.log_dir = dir.path().join("logs");
        cfg.engine.backend = EngineBackend::Library;

        assert!(matches!(
            run_startup_checks(&cfg, false).await,
            Err(StartupError::NativeEngineMissing)
        ));
        assert_eq!(run_startup_checks(&cfg, true).await.unwrap(), None);
        assert!(dir.path().join("logs").is_dir());
    }
}
