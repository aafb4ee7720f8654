//! Concrete collaborators for the CronBot worker.
//!
//! [`AnthropicOracle`] implements `cronbot_core::ReasoningOracle` over the
//! Anthropic Messages API; [`KanbanWorkSource`] implements
//! `cronbot_core::WorkSource` over the kanban service's REST API.

pub mod anthropic;
pub mod kanban;

pub use anthropic::AnthropicOracle;
pub use kanban::KanbanWorkSource;

/// Build the shared HTTP client with a request timeout.
pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}
