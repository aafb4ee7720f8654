//! `cronbot approvals`: review parked tool calls through the operator interface.

use std::path::Path;
use std::time::Duration;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Action {
    /// List pending approvals
    List,

    /// Execute a parked call
    Approve { id: String },

    /// Discard a parked call
    Reject { id: String },
}

pub async fn run(
    explicit: Option<&Path>,
    action: Action,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(explicit)?;
    let base = format!("http://{}:{}", config.operator.host, config.operator.port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let request = match &action {
        Action::List => client.get(format!("{base}/approvals")),
        Action::Approve { id } => client.post(format!("{base}/approvals/{id}/approve")),
        Action::Reject { id } => client.post(format!("{base}/approvals/{id}/reject")),
    };
    let response = request
        .send()
        .await
        .map_err(|e| format!("Operator interface unreachable at {base}: {e}"))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err("no pending approval with that id".into());
    }
    if !status.is_success() {
        return Err(format!("operator interface returned {status}").into());
    }
    let body: serde_json::Value = response.json().await?;

    match action {
        Action::List => print_pending(&body),
        Action::Approve { id } | Action::Reject { id } => {
            let outcome = body["status"].as_str().unwrap_or("unknown");
            let detail = body["output"]
                .as_str()
                .or_else(|| body["error"].as_str())
                .unwrap_or("");
            println!("{id}: {outcome}");
            if !detail.is_empty() {
                println!("  {detail}");
            }
        }
    }
    Ok(())
}

fn print_pending(body: &serde_json::Value) {
    let Some(approvals) = body["approvals"].as_array().filter(|a| !a.is_empty()) else {
        println!("No pending approvals");
        return;
    };
    println!("Pending approvals:");
    for approval in approvals {
        println!(
            "  {}  {}  {}",
            approval["id"].as_str().unwrap_or("?"),
            approval["tool_name"].as_str().unwrap_or("?"),
            approval["reason"].as_str().unwrap_or("")
        );
        println!("    args: {}", approval["arguments"]);
    }
}
