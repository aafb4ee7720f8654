pub mod approvals;
pub mod checkpoints;
pub mod daemon;
pub mod init;
pub mod status;

use std::path::{Path, PathBuf};

use cronbot_config::AppConfig;
use cronbot_state::StateLimits;

/// The config file to use: `--config` if given, else the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}").into())
}

pub fn state_limits(config: &AppConfig) -> StateLimits {
    StateLimits {
        max_decisions: config.state.max_decisions,
        max_checkpoints: config.state.max_checkpoints,
        max_journal_entries: config.state.max_journal_entries,
        token_budget: config.worker.token_budget,
    }
}

/// `<state_path>/<worker_id>`, where the store keeps its files.
pub fn worker_state_dir(config: &AppConfig) -> PathBuf {
    config
        .worker
        .state_path
        .join(config.agent_id_or_default())
}

pub fn checkpoint_dir(config: &AppConfig) -> PathBuf {
    worker_state_dir(config).join("checkpoints")
}
