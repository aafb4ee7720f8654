//! Configuration loading, validation, and management for the CronBot worker.
//!
//! Loads configuration from `~/.cronbot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cronbot_core::AutonomyLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.cronbot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker identity and storage locations
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Approval policy tier
    #[serde(default)]
    pub autonomy: AutonomyConfig,

    /// Reasoning oracle connection
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Work source connection
    #[serde(default)]
    pub work_source: WorkSourceConfig,

    /// Retry policy for transient oracle failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Control loop timings
    #[serde(default, rename = "loop")]
    pub control_loop: LoopConfig,

    /// State store retention bounds
    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Operator HTTP interface
    #[serde(default)]
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Root directory for context, journal and checkpoints
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory the built-in tools are confined to
    #[serde(default = "default_workspace_path")]
    pub workspace_path: PathBuf,

    /// Token ceiling of the worker context
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
}

fn default_state_path() -> PathBuf {
    AppConfig::config_dir().join("state")
}
fn default_workspace_path() -> PathBuf {
    AppConfig::workspace_dir()
}
fn default_token_budget() -> u64 {
    200_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            project_id: None,
            state_path: default_state_path(),
            workspace_path: default_workspace_path(),
            token_budget: default_token_budget(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default)]
    pub level: AutonomyLevel,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_oracle_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per oracle response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_oracle_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_oracle_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSourceConfig {
    #[serde(default = "default_kanban_url")]
    pub url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_kanban_url() -> String {
    "http://localhost:5000/api".into()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for WorkSourceConfig {
    fn default() -> Self {
        Self {
            url: default_kanban_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Sleep between polls when the work source has nothing
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait after a blocker is surfaced
    #[serde(default = "default_blocker_cooldown")]
    pub blocker_cooldown_secs: u64,

    /// Wait after a failed unit of work
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    #[serde(default = "default_max_reasoning_rounds")]
    pub max_reasoning_rounds: u32,

    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_blocker_cooldown() -> u64 {
    30
}
fn default_error_backoff() -> u64 {
    10
}
fn default_max_reasoning_rounds() -> u32 {
    8
}
fn default_reasoning_timeout() -> u64 {
    300
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            blocker_cooldown_secs: default_blocker_cooldown(),
            error_backoff_secs: default_error_backoff(),
            max_reasoning_rounds: default_max_reasoning_rounds(),
            reasoning_timeout_secs: default_reasoning_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_max_decisions")]
    pub max_decisions: usize,

    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,

    #[serde(default = "default_max_journal_entries")]
    pub max_journal_entries: usize,
}

fn default_max_decisions() -> usize {
    50
}
fn default_max_checkpoints() -> usize {
    10
}
fn default_max_journal_entries() -> usize {
    100
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_decisions: default_max_decisions(),
            max_checkpoints: default_max_checkpoints(),
            max_journal_entries: default_max_journal_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Serve the built-in workspace tools in-process
    #[serde(default = "default_true")]
    pub enable_builtin: bool,

    /// Tools whose success changes a file (fingerprinted for loop detection)
    #[serde(default = "default_file_edit_tools")]
    pub file_edit_tools: Vec<String>,

    /// Tools whose result counts as a verification record
    #[serde(default = "default_verification_tools")]
    pub verification_tools: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_file_edit_tools() -> Vec<String> {
    vec!["write_file".into(), "edit_file".into(), "create_file".into()]
}
fn default_verification_tools() -> Vec<String> {
    vec!["run_tests".into(), "run_build".into(), "run_lint".into()]
}
fn default_command_timeout() -> u64 {
    60
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_builtin: true,
            file_edit_tools: default_file_edit_tools(),
            verification_tools: default_verification_tools(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    42618
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply environment overrides.
    ///
    /// Resolution order: defaults → config file → environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (highest priority).
    ///
    /// Numeric values that fail to parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = get("AGENT_ID").or_else(|| get("CRONBOT_AGENT_ID")) {
            self.worker.agent_id = Some(id);
        }
        if let Some(id) = get("PROJECT_ID") {
            self.worker.project_id = Some(id);
        }
        if let Some(level) = get("AUTONOMY_LEVEL") {
            self.autonomy.level = AutonomyLevel::parse_lenient(&level);
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.oracle.api_key = Some(key);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.oracle.base_url = url;
        }
        if let Some(url) = get("KANBAN_URL") {
            self.work_source.url = url;
        }
        if let Some(path) = get("AGENT_STATE_PATH") {
            self.worker.state_path = PathBuf::from(path);
        }
        if let Some(path) = get("WORKSPACE_PATH") {
            self.worker.workspace_path = PathBuf::from(path);
        }

        override_parsed(&get, "MAX_TOKENS", &mut self.worker.token_budget);
        override_parsed(&get, "RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&get, "RETRY_INITIAL_DELAY_MS", &mut self.retry.initial_delay_ms);
        override_parsed(&get, "RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);
        override_parsed(&get, "RETRY_BACKOFF_MULTIPLIER", &mut self.retry.backoff_multiplier);
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cronbot")
    }

    /// Get the workspace directory path.
    pub fn workspace_dir() -> PathBuf {
        Self::config_dir().join("workspace")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("loop.poll_interval_secs", self.control_loop.poll_interval_secs),
            ("loop.blocker_cooldown_secs", self.control_loop.blocker_cooldown_secs),
            ("loop.error_backoff_secs", self.control_loop.error_backoff_secs),
            ("loop.reasoning_timeout_secs", self.control_loop.reasoning_timeout_secs),
            ("loop.max_reasoning_rounds", u64::from(self.control_loop.max_reasoning_rounds)),
            ("state.max_decisions", self.state.max_decisions as u64),
            ("state.max_checkpoints", self.state.max_checkpoints as u64),
            ("state.max_journal_entries", self.state.max_journal_entries as u64),
            ("worker.token_budget", self.worker.token_budget),
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.backoff_multiplier must be >= 1".into(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Check everything the daemon cannot start without.
    pub fn require_daemon_credentials(&self) -> Result<(), ConfigError> {
        if self.worker.agent_id.is_none() {
            return Err(ConfigError::MissingCredential("AGENT_ID".into()));
        }
        if self.worker.project_id.is_none() {
            return Err(ConfigError::MissingCredential("PROJECT_ID".into()));
        }
        if self.oracle.api_key.is_none() {
            return Err(ConfigError::MissingCredential("ANTHROPIC_API_KEY".into()));
        }
        Ok(())
    }

    /// The worker id, or `"default"` when none is configured.
    pub fn agent_id_or_default(&self) -> &str {
        self.worker.agent_id.as_deref().unwrap_or("default")
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn override_parsed<T, G>(get: &G, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Required setting {0} is not set")]
    MissingCredential(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.autonomy.level, AutonomyLevel::Balanced);
        assert_eq!(config.control_loop.poll_interval_secs, 30);
        assert_eq!(config.control_loop.error_backoff_secs, 10);
        assert_eq!(config.state.max_decisions, 50);
        assert_eq!(config.state.max_checkpoints, 10);
        assert_eq!(config.worker.token_budget, 200_000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.work_source.url, config.work_source.url);
        assert_eq!(parsed.operator.port, config.operator.port);
        assert_eq!(parsed.retry, config.retry);
    }

    #[test]
    fn loop_section_uses_keyword_name() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [loop]
            poll_interval_secs = 5

            [autonomy]
            level = 3
            "#,
        )
        .unwrap();
        assert_eq!(parsed.control_loop.poll_interval_secs, 5);
        assert_eq!(parsed.control_loop.blocker_cooldown_secs, 30);
        assert_eq!(parsed.autonomy.level, AutonomyLevel::FullAutonomy);
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = AppConfig::default();
        config.control_loop.poll_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn shrinking_multiplier_rejected() {
        let mut config = AppConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.work_source.url, "http://localhost:5000/api");
    }

    #[test]
    fn unparseable_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[loop\npoll_interval_secs = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn file_values_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[worker]\nagent_id = \"agent-7\"\n\n[state]\nmax_checkpoints = 4\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.worker.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(config.state.max_checkpoints, 4);
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[
            ("AGENT_ID", "agent-1"),
            ("PROJECT_ID", "proj-9"),
            ("AUTONOMY_LEVEL", "cautious"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("KANBAN_URL", "http://kanban:8080/api"),
            ("AGENT_STATE_PATH", "/agent-state"),
            ("MAX_TOKENS", "1000"),
            ("RETRY_MAX_ATTEMPTS", "5"),
        ]));
        assert_eq!(config.worker.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(config.worker.project_id.as_deref(), Some("proj-9"));
        assert_eq!(config.autonomy.level, AutonomyLevel::Cautious);
        assert_eq!(config.work_source.url, "http://kanban:8080/api");
        assert_eq!(config.worker.state_path, PathBuf::from("/agent-state"));
        assert_eq!(config.worker.token_budget, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.require_daemon_credentials().is_ok());
    }

    #[test]
    fn prefixed_agent_id_is_a_fallback() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[("CRONBOT_AGENT_ID", "agent-2")]));
        assert_eq!(config.worker.agent_id.as_deref(), Some("agent-2"));
    }

    #[test]
    fn bad_numeric_override_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[("MAX_TOKENS", "lots"), ("AUTONOMY_LEVEL", "9")]));
        assert_eq!(config.worker.token_budget, 200_000);
        assert_eq!(config.autonomy.level, AutonomyLevel::Balanced);
    }

    #[test]
    fn daemon_requires_credentials() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[("AGENT_ID", "agent-1"), ("PROJECT_ID", "p")]));
        let err = config.require_daemon_credentials().unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(0), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(1), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(4000));
        assert_eq!(retry.delay_for(10), Duration::from_millis(30_000));
    }

    #[test]
    fn oracle_debug_redacts_key() {
        let mut config = AppConfig::default();
        config.oracle.api_key = Some("sk-secret".into());
        let debug = format!("{:?}", config.oracle);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[loop]"));
        assert!(toml_str.contains("localhost:5000"));
    }
}
