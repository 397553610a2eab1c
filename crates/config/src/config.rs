//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Which engine implementation drives an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    /// Spawn the command-line encoder once per job.
    #[default]
    Cli,
    /// Drive a linked native encoder instance.
    Library,
}

impl std::str::FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cli" => Ok(Self::Cli),
            "library" | "lib" => Ok(Self::Library),
            other => Err(format!("unknown engine backend: {}", other)),
        }
    }
}

/// Scheduling priority given to the engine process.
///
/// Serialized with the display strings users see in preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessPriority {
    #[serde(rename = "Realtime")]
    Realtime,
    #[serde(rename = "High")]
    High,
    #[serde(rename = "Above Normal")]
    AboveNormal,
    #[serde(rename = "Normal")]
    Normal,
    #[default]
    #[serde(rename = "Below Normal")]
    BelowNormal,
    #[serde(rename = "Low")]
    Low,
}

impl ProcessPriority {
    pub const ALL: [ProcessPriority; 6] = [
        ProcessPriority::Realtime,
        ProcessPriority::High,
        ProcessPriority::AboveNormal,
        ProcessPriority::Normal,
        ProcessPriority::BelowNormal,
        ProcessPriority::Low,
    ];

    /// Display label, as stored in config files.
    pub fn label(self) -> &'static str {
        match self {
            ProcessPriority::Realtime => "Realtime",
            ProcessPriority::High => "High",
            ProcessPriority::AboveNormal => "Above Normal",
            ProcessPriority::Normal => "Normal",
            ProcessPriority::BelowNormal => "Below Normal",
            ProcessPriority::Low => "Low",
        }
    }

    /// Unix nice value matching this priority class.
    pub fn nice_value(self) -> i32 {
        match self {
            ProcessPriority::Realtime => -20,
            ProcessPriority::High => -10,
            ProcessPriority::AboveNormal => -5,
            ProcessPriority::Normal => 0,
            ProcessPriority::BelowNormal => 5,
            ProcessPriority::Low => 19,
        }
    }
}

impl std::fmt::Display for ProcessPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for ProcessPriority {
    type Err = String;

    /// Accepts the display label case-insensitively, with or without spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.label().replace(' ', "").to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown process priority: {}", s))
    }
}

/// What to do once every queued job has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostQueueAction {
    #[default]
    None,
    Shutdown,
    LogOff,
    Suspend,
    Hibernate,
    LockSystem,
    QuitApplication,
}

impl std::str::FromStr for PostQueueAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "none" | "donothing" => Ok(Self::None),
            "shutdown" => Ok(Self::Shutdown),
            "logoff" => Ok(Self::LogOff),
            "suspend" => Ok(Self::Suspend),
            "hibernate" => Ok(Self::Hibernate),
            "locksystem" => Ok(Self::LockSystem),
            "quitapplication" | "quit" => Ok(Self::QuitApplication),
            _ => Err(format!("unknown post-queue action: {}", s)),
        }
    }
}

/// Engine-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,
    /// Path or name of the command-line encoder (default "HandBrakeCLI")
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    #[serde(default)]
    pub process_priority: ProcessPriority,
    /// Hide the engine's console window where the platform has one
    #[serde(default = "default_true")]
    pub minimized: bool,
    /// Status poll interval in milliseconds (default 250)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Value passed as `--verbose=N`
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(default)]
    pub disable_dvdnav: bool,
    /// Kill stray engine processes with the same name when stopping
    #[serde(default = "default_true")]
    pub sweep_orphans: bool,
}

fn default_cli_path() -> PathBuf {
    PathBuf::from("HandBrakeCLI")
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_verbosity() -> u8 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            cli_path: default_cli_path(),
            process_priority: ProcessPriority::default(),
            minimized: true,
            poll_interval_ms: default_poll_interval_ms(),
            verbosity: default_verbosity(),
            disable_dvdnav: false,
            sweep_orphans: true,
        }
    }
}

/// Queue persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Recovery file location (default: temp dir / hb_queue_recovery.json)
    #[serde(default = "default_recovery_file")]
    pub recovery_file: PathBuf,
    /// Sleep between checks while the queue is paused (default 5)
    #[serde(default = "default_pause_poll_secs")]
    pub pause_poll_secs: u64,
}

fn default_recovery_file() -> PathBuf {
    env::temp_dir().join("hb_queue_recovery.json")
}

fn default_pause_poll_secs() -> u64 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            recovery_file: default_recovery_file(),
            pause_poll_secs: default_pause_poll_secs(),
        }
    }
}

/// Encode log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Directory holding the live encode log and archived per-destination logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Also copy the archived log next to the encoded file
    #[serde(default)]
    pub save_log_with_video: bool,
    /// Extra directory to receive a copy of every archived log
    #[serde(default)]
    pub save_log_copy_directory: Option<PathBuf>,
    /// Stop the engine once its log grows past this many bytes
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: u64,
}

fn default_log_dir() -> PathBuf {
    env::temp_dir().join("hbqueue").join("logs")
}

fn default_max_log_bytes() -> u64 {
    100_000_000
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            save_log_with_video: false,
            save_log_copy_directory: None,
            max_log_bytes: default_max_log_bytes(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub after_queue: PostQueueAction,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - HB_CLI_PATH -> engine.cli_path
    /// - HB_ENGINE_BACKEND -> engine.backend
    /// - HB_PROCESS_PRIORITY -> engine.process_priority
    /// - HB_POLL_INTERVAL_MS -> engine.poll_interval_ms
    /// - HB_RECOVERY_FILE -> queue.recovery_file
    /// - HB_LOG_DIR -> logging.log_dir
    /// - HB_AFTER_QUEUE -> after_queue
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("HB_CLI_PATH") {
            if !val.trim().is_empty() {
                self.engine.cli_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HB_ENGINE_BACKEND") {
            if let Ok(backend) = val.parse() {
                self.engine.backend = backend;
            }
        }

        if let Ok(val) = env::var("HB_PROCESS_PRIORITY") {
            if let Ok(priority) = val.parse() {
                self.engine.process_priority = priority;
            }
        }

        if let Ok(val) = env::var("HB_POLL_INTERVAL_MS") {
            // zero would turn the poll loop into a spin
            if let Ok(ms) = val.parse::<u64>() {
                if ms > 0 {
                    self.engine.poll_interval_ms = ms;
                }
            }
        }

        if let Ok(val) = env::var("HB_RECOVERY_FILE") {
            if !val.trim().is_empty() {
                self.queue.recovery_file = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HB_LOG_DIR") {
            if !val.trim().is_empty() {
                self.logging.log_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HB_AFTER_QUEUE") {
            if let Ok(action) = val.parse() {
                self.after_queue = action;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for key in [
            "HB_CLI_PATH",
            "HB_ENGINE_BACKEND",
            "HB_PROCESS_PRIORITY",
            "HB_POLL_INTERVAL_MS",
            "HB_RECOVERY_FILE",
            "HB_LOG_DIR",
            "HB_AFTER_QUEUE",
        ] {
            env::remove_var(key);
        }
    }

    fn priority_strategy() -> impl Strategy<Value = ProcessPriority> {
        proptest::sample::select(ProcessPriority::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            priority in priority_strategy(),
            minimized in proptest::bool::ANY,
            poll in 1u64..5_000,
            verbosity in 0u8..4,
            pause_secs in 1u64..60,
            with_video in proptest::bool::ANY,
            max_log in 1u64..1_000_000_000,
        ) {
            let toml_str = format!(
                r#"
after_queue = "suspend"

[engine]
backend = "library"
cli_path = "/opt/hb/HandBrakeCLI"
process_priority = "{}"
minimized = {}
poll_interval_ms = {}
verbosity = {}

[queue]
recovery_file = "/var/tmp/queue.json"
pause_poll_secs = {}

[logging]
log_dir = "/var/log/hb"
save_log_with_video = {}
max_log_bytes = {}
"#,
                priority.label(),
                minimized,
                poll,
                verbosity,
                pause_secs,
                with_video,
                max_log,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.engine.backend, EngineBackend::Library);
            prop_assert_eq!(config.engine.cli_path, PathBuf::from("/opt/hb/HandBrakeCLI"));
            prop_assert_eq!(config.engine.process_priority, priority);
            prop_assert_eq!(config.engine.minimized, minimized);
            prop_assert_eq!(config.engine.poll_interval_ms, poll);
            prop_assert_eq!(config.engine.verbosity, verbosity);
            prop_assert_eq!(config.queue.recovery_file, PathBuf::from("/var/tmp/queue.json"));
            prop_assert_eq!(config.queue.pause_poll_secs, pause_secs);
            prop_assert_eq!(config.logging.log_dir, PathBuf::from("/var/log/hb"));
            prop_assert_eq!(config.logging.save_log_with_video, with_video);
            prop_assert_eq!(config.logging.max_log_bytes, max_log);
            prop_assert_eq!(config.after_queue, PostQueueAction::Suspend);
        }

        #[test]
        fn prop_env_overrides_process_priority(
            initial in priority_strategy(),
            override_priority in priority_strategy(),
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[engine]\nprocess_priority = \"{}\"\n", initial.label());
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HB_PROCESS_PRIORITY", override_priority.label());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.engine.process_priority, override_priority);
        }

        #[test]
        fn prop_env_overrides_poll_interval(
            initial in 1u64..1_000,
            override_ms in 1u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[engine]\npoll_interval_ms = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HB_POLL_INTERVAL_MS", override_ms.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.engine.poll_interval_ms, override_ms);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.engine.backend, EngineBackend::Cli);
        assert_eq!(config.engine.cli_path, PathBuf::from("HandBrakeCLI"));
        assert_eq!(config.engine.process_priority, ProcessPriority::BelowNormal);
        assert_eq!(config.engine.poll_interval_ms, 250);
        assert_eq!(config.engine.verbosity, 1);
        assert!(config.engine.minimized);
        assert!(config.engine.sweep_orphans);
        assert_eq!(config.queue.pause_poll_secs, 5);
        assert!(config
            .queue
            .recovery_file
            .ends_with("hb_queue_recovery.json"));
        assert_eq!(config.logging.max_log_bytes, 100_000_000);
        assert_eq!(config.logging.save_log_copy_directory, None);
        assert_eq!(config.after_queue, PostQueueAction::None);
    }

    #[test]
    fn test_invalid_env_values_keep_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("HB_PROCESS_PRIORITY", "Ludicrous");
        env::set_var("HB_POLL_INTERVAL_MS", "0");
        env::set_var("HB_AFTER_QUEUE", "explode");
        env::set_var("HB_ENGINE_BACKEND", "gpu");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_priority_labels_parse_loosely() {
        assert_eq!(
            "above normal".parse::<ProcessPriority>(),
            Ok(ProcessPriority::AboveNormal)
        );
        assert_eq!(
            "BelowNormal".parse::<ProcessPriority>(),
            Ok(ProcessPriority::BelowNormal)
        );
        assert_eq!(
            "realtime".parse::<ProcessPriority>(),
            Ok(ProcessPriority::Realtime)
        );
        assert!("idle".parse::<ProcessPriority>().is_err());
    }

    #[test]
    fn test_post_queue_action_parses_legacy_labels() {
        assert_eq!(
            "Lock System".parse::<PostQueueAction>(),
            Ok(PostQueueAction::LockSystem)
        );
        assert_eq!(
            "Log Off".parse::<PostQueueAction>(),
            Ok(PostQueueAction::LogOff)
        );
        assert!("teleport".parse::<PostQueueAction>().is_err());
        assert_eq!(
            "quit_application".parse::<PostQueueAction>(),
            Ok(PostQueueAction::QuitApplication)
        );
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_bad_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine\nbackend = ").unwrap();
        assert!(matches!(
            Config::load_or_default(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
