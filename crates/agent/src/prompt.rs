//! Prompt assembly for reasoning requests.

use cronbot_core::agent::AutonomyLevel;
use cronbot_core::context::WorkerContext;
use cronbot_core::tool::ToolDefinition;
use cronbot_core::work::UnitOfWork;

/// Decisions echoed back to the oracle with every unit of work.
const RECENT_DECISIONS: usize = 5;

pub fn system_prompt(level: AutonomyLevel) -> String {
    format!(
        "You are CronBot, an autonomous software development worker. \
You carry units of work from a project board through to completion.

## Autonomy Level: {level} ({description})

## Guidelines
1. Read and understand existing code before changing it
2. Make small, focused changes and verify after each one
3. Write clear commit messages describing what changed and why
4. Report blockers clearly instead of retrying blindly
5. Record the important decisions you make

## Approvals
Some tools need operator approval at this autonomy level. When a call comes
back as pending approval, do not retry it; continue with other work or finish
with a summary of what is waiting.

## Error Handling
- If an operation fails, try an alternative approach
- After 3 failures of the same tool, stop and report the blocker
",
        description = level.description(),
    )
}

/// The user-side payload: task, serialized context and tool list.
pub fn context_payload(
    context: &WorkerContext,
    unit: &UnitOfWork,
    tools: &[ToolDefinition],
) -> String {
    let decisions = context
        .last_decisions(RECENT_DECISIONS)
        .iter()
        .map(|d| format!("- {}", d.text))
        .collect::<Vec<_>>();
    let decisions = if decisions.is_empty() {
        "No recent decisions".to_string()
    } else {
        decisions.join("\n")
    };

    let tool_lines = if tools.is_empty() {
        "No tools available".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let worker_state = serde_json::json!({
        "phase": context.phase,
        "active_files": context.active_files,
        "token_count": context.token_count,
        "token_budget": context.token_budget,
    });

    let description = if unit.description.is_empty() {
        "No description provided"
    } else {
        &unit.description
    };

    let mut payload = format!(
        "## Task Information
- **ID**: {id}
- **Title**: {title}
- **Description**: {description}
- **Type**: {kind}
",
        id = unit.id,
        title = unit.title,
        kind = unit.kind.as_deref().unwrap_or("unspecified"),
    );

    if !unit.payload.is_null() {
        payload.push_str(&format!("\n## Task Payload\n```json\n{:#}\n```\n", unit.payload));
    }

    payload.push_str(&format!(
        "
## Worker State
```json
{worker_state:#}
```

## Recent Decisions
{decisions}

## Available Tools
{tool_lines}

Please complete this task. Start by creating a plan, then execute it step by step.
"
    ));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronbot_core::context::Decision;

    fn unit() -> UnitOfWork {
        UnitOfWork {
            id: "t-7".into(),
            title: "Fix flaky test".into(),
            description: String::new(),
            kind: Some("bug".into()),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn system_prompt_names_autonomy_level() {
        let prompt = system_prompt(AutonomyLevel::Cautious);
        assert!(prompt.contains("1 (cautious)"));
        assert!(prompt.contains("approval on writes"));
    }

    #[test]
    fn payload_includes_task_tools_and_recent_decisions() {
        let mut ctx = WorkerContext::default();
        for i in 0..7 {
            ctx.push_decision(Decision::new(format!("decision {i}"), None, 5), 50);
        }
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        let payload = context_payload(&ctx, &unit(), &tools);
        assert!(payload.contains("**ID**: t-7"));
        assert!(payload.contains("No description provided"));
        assert!(payload.contains("- read_file: Read a file"));
        assert!(payload.contains("decision 6"));
        assert!(!payload.contains("decision 1"));
        assert!(payload.contains("\"phase\": \"initializing\""));
        assert!(!payload.contains("Task Payload"));
    }

    #[test]
    fn payload_without_tools_or_decisions() {
        let payload = context_payload(&WorkerContext::default(), &unit(), &[]);
        assert!(payload.contains("No tools available"));
        assert!(payload.contains("No recent decisions"));
    }
}
