use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-project state directory (backups, history, sessions).
pub const STATE_DIR: &str = ".live";

/// Live-mode configuration loaded from `<project>/.live/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LiveConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LiveConfig {
    /// Load config for `project_dir`, falling back to defaults when the file
    /// does not exist.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::default_path(project_dir);
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = LiveConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: LiveConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver.port == 0 {
            return Err(ConfigError::Validation("receiver.port must be non-zero".into()));
        }
        if !self.receiver.error_path.starts_with('/') || !self.receiver.network_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "receiver paths must start with '/'".into(),
            ));
        }
        self.scheduler.validate()?;
        if self.classifier.deep_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "classifier.deep_timeout_secs must be non-zero".into(),
            ));
        }
        if self.process.history_capacity == 0 || self.network.log_capacity == 0 {
            return Err(ConfigError::Validation("capacities must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.network.similarity_threshold) {
            return Err(ConfigError::Validation(
                "network.similarity_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if self.remediation.git_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remediation.git_timeout_secs must be non-zero".into(),
            ));
        }
        if self.performance.build_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "performance.build_timeout_secs must be non-zero".into(),
            ));
        }
        if self.tests.timeout_secs == 0 {
            return Err(ConfigError::Validation("tests.timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watch_dirs")]
    pub directories: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            directories: default_watch_dirs(),
            extensions: default_extensions(),
            ignored_dirs: default_ignored_dirs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_watch_dirs() -> Vec<String> {
    ["frontend", "backend", "database", "cli", "mobile", "src"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_extensions() -> Vec<String> {
    [
        "py", "js", "jsx", "ts", "tsx", "vue", "svelte", "java", "go", "rs", "rb", "php",
        "swift", "kt", "html", "css", "scss", "sass", "json", "yaml", "yml", "sql", "graphql",
        "md", "toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_ignored_dirs() -> Vec<String> {
    [
        "node_modules", "__pycache__", ".git", ".venv", "venv", "env", "dist", "build", ".next",
        ".nuxt", "target", "bin", "obj", ".live", "logs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_debounce_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_error_path")]
    pub error_path: String,
    #[serde(default = "default_network_path")]
    pub network_path: String,
    #[serde(default = "default_true")]
    pub inject_script: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            error_path: default_error_path(),
            network_path: default_network_path(),
            inject_script: true,
        }
    }
}

impl ReceiverConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7777
}
fn default_error_path() -> String {
    "/livewire/console-error".into()
}
fn default_network_path() -> String {
    "/livewire/network".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    #[serde(default = "default_rapid_change_window_secs")]
    pub rapid_change_window_secs: u64,
    #[serde(default = "default_rapid_change_threshold")]
    pub rapid_change_threshold: usize,
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
    #[serde(default = "default_batch_window_secs")]
    pub batch_window_secs: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,
    #[serde(default = "default_max_high_per_flush")]
    pub max_high_per_flush: usize,
    #[serde(default = "default_max_medium_per_flush")]
    pub max_medium_per_flush: usize,
    #[serde(default = "default_passive_queue_capacity")]
    pub passive_queue_capacity: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            flush_debounce_ms: default_flush_debounce_ms(),
            idle_threshold_secs: default_idle_threshold_secs(),
            rapid_change_window_secs: default_rapid_change_window_secs(),
            rapid_change_threshold: default_rapid_change_threshold(),
            batch_threshold: default_batch_threshold(),
            batch_window_secs: default_batch_window_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
            max_high_per_flush: default_max_high_per_flush(),
            max_medium_per_flush: default_max_medium_per_flush(),
            passive_queue_capacity: default_passive_queue_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Validation("scheduler.tick_ms must be non-zero".into()));
        }
        if self.batch_threshold < 2 {
            return Err(ConfigError::Validation(
                "scheduler.batch_threshold must be at least 2".into(),
            ));
        }
        if self.rapid_change_threshold == 0 || self.passive_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "scheduler thresholds and capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_tick_ms() -> u64 {
    1000
}
fn default_flush_debounce_ms() -> u64 {
    2000
}
fn default_idle_threshold_secs() -> u64 {
    30
}
fn default_rapid_change_window_secs() -> u64 {
    10
}
fn default_rapid_change_threshold() -> usize {
    5
}
fn default_batch_threshold() -> usize {
    3
}
fn default_batch_window_secs() -> u64 {
    60
}
fn default_dedup_window_secs() -> u64 {
    300
}
fn default_dedup_prefix_chars() -> usize {
    50
}
fn default_max_high_per_flush() -> usize {
    3
}
fn default_max_medium_per_flush() -> usize {
    1
}
fn default_passive_queue_capacity() -> usize {
    200
}
fn default_history_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub deep_analysis: bool,
    #[serde(default = "default_deep_timeout_secs")]
    pub deep_timeout_secs: u64,
    #[serde(default = "default_deep_max_content_chars")]
    pub deep_max_content_chars: usize,
    #[serde(default = "default_deep_failure_threshold")]
    pub deep_failure_threshold: u32,
    #[serde(default = "default_deep_cooldown_secs")]
    pub deep_cooldown_secs: u64,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            deep_analysis: true,
            deep_timeout_secs: default_deep_timeout_secs(),
            deep_max_content_chars: default_deep_max_content_chars(),
            deep_failure_threshold: default_deep_failure_threshold(),
            deep_cooldown_secs: default_deep_cooldown_secs(),
            model: default_model(),
        }
    }
}

fn default_deep_timeout_secs() -> u64 {
    20
}
fn default_deep_max_content_chars() -> usize {
    2000
}
fn default_deep_failure_threshold() -> u32 {
    3
}
fn default_deep_cooldown_secs() -> u64 {
    120
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

/// A dev or build command spawned and monitored on activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCommand {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_process_history")]
    pub history_capacity: usize,
    #[serde(default = "default_error_log_capacity")]
    pub error_log_capacity: usize,
    #[serde(default)]
    pub commands: Vec<ProcessCommand>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_process_history(),
            error_log_capacity: default_error_log_capacity(),
            commands: Vec::new(),
        }
    }
}

fn default_process_history() -> usize {
    1000
}
fn default_error_log_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: String,
    #[serde(default = "default_backend_dir")]
    pub backend_dir: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            slow_request_ms: default_slow_request_ms(),
            similarity_threshold: default_similarity_threshold(),
            log_capacity: default_log_capacity(),
            frontend_dir: default_frontend_dir(),
            backend_dir: default_backend_dir(),
        }
    }
}

fn default_slow_request_ms() -> u64 {
    1000
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_log_capacity() -> usize {
    500
}
fn default_frontend_dir() -> String {
    "frontend".into()
}
fn default_backend_dir() -> String {
    "backend".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default)]
    pub auto_commit: AutoCommit,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            snippet_chars: default_snippet_chars(),
            auto_commit: AutoCommit::default(),
            git_timeout_secs: default_git_timeout_secs(),
        }
    }
}

/// When applied fixes are committed to git.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCommit {
    #[default]
    Off,
    /// One commit per successful fix.
    AfterFix,
    /// Fixes still applied at deactivation, grouped by commit type and scope.
    SessionEnd,
}

fn default_git_timeout_secs() -> u64 {
    30
}

fn default_state_dir() -> String {
    STATE_DIR.into()
}
fn default_snippet_chars() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default = "default_test_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_test_timeout_secs(),
        }
    }
}

fn default_test_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    /// Bundle growth between two checks that earns a warning.
    #[serde(default = "default_bundle_growth_warn_percent")]
    pub bundle_growth_warn_percent: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            build_timeout_secs: default_build_timeout_secs(),
            bundle_growth_warn_percent: default_bundle_growth_warn_percent(),
        }
    }
}

fn default_build_timeout_secs() -> u64 {
    600
}
fn default_bundle_growth_warn_percent() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = LiveConfig::default();
        cfg.validate().expect("default config must validate");
        assert_eq!(cfg.receiver.port, 7777);
        assert_eq!(cfg.scheduler.idle_threshold_secs, 30);
        assert_eq!(cfg.scheduler.max_high_per_flush, 3);
        assert_eq!(cfg.tests.timeout_secs, 300);
        assert!(cfg.watcher.ignored_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = LiveConfig::from_toml(
            r#"
            [receiver]
            port = 9999

            [[process.commands]]
            name = "frontend"
            program = "npm"
            args = ["run", "dev"]
            cwd = "frontend"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.receiver.port, 9999);
        assert_eq!(cfg.receiver.error_path, "/livewire/console-error");
        assert_eq!(cfg.process.commands.len(), 1);
        assert_eq!(cfg.process.commands[0].args, vec!["run", "dev"]);
        assert_eq!(cfg.scheduler.flush_debounce_ms, 2000);
    }

    #[test]
    fn auto_commit_is_opt_in() {
        assert_eq!(LiveConfig::default().remediation.auto_commit, AutoCommit::Off);
        let cfg = LiveConfig::from_toml("[remediation]\nauto_commit = \"session_end\"\n").unwrap();
        assert_eq!(cfg.remediation.auto_commit, AutoCommit::SessionEnd);
        assert_eq!(cfg.remediation.git_timeout_secs, 30);
    }

    #[test]
    fn rejects_zero_port() {
        let err = LiveConfig::from_toml("[receiver]\nport = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_garbage() {
        let err = LiveConfig::from_toml("[receiver\nport=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LiveConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.watcher.debounce_ms, 1000);
    }

    #[test]
    fn toml_roundtrip_preserves_overrides() {
        let mut cfg = LiveConfig::default();
        cfg.network.slow_request_ms = 250;
        let text = cfg.to_toml().unwrap();
        let back = LiveConfig::from_toml(&text).unwrap();
        assert_eq!(back.network.slow_request_ms, 250);
    }
}
