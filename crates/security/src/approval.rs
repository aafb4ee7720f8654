//! Approval policy: the autonomy gate in front of every tool call.
//!
//! Rules:
//! - security-critical tools need approval unless autonomy is at the maximum tier
//! - write tools need approval below the balanced tier
//! - everything else runs immediately

use cronbot_core::AutonomyLevel;
use serde::{Deserialize, Serialize};

/// Process execution and destructive file or version-control operations.
pub const SECURITY_CRITICAL_TOOLS: &[&str] = &[
    "execute_command",
    "run_script",
    "delete_file",
    "git_push",
    "git_force_push",
    "docker_exec",
];

/// File and branch mutation.
pub const WRITE_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "create_file",
    "git_commit",
    "git_merge",
    "create_branch",
    "delete_branch",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    SecurityCritical,
    Write,
    Other,
}

impl ToolCategory {
    pub fn of(tool_name: &str) -> Self {
        if SECURITY_CRITICAL_TOOLS.contains(&tool_name) {
            ToolCategory::SecurityCritical
        } else if WRITE_TOOLS.contains(&tool_name) {
            ToolCategory::Write
        } else {
            ToolCategory::Other
        }
    }

    /// Lowest autonomy level that executes this category without approval.
    pub fn required_level(&self) -> AutonomyLevel {
        match self {
            ToolCategory::SecurityCritical => AutonomyLevel::FullAutonomy,
            ToolCategory::Write => AutonomyLevel::Balanced,
            ToolCategory::Other => AutonomyLevel::Reactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Allowed,
    RequiresApproval { reason: String },
}

impl ApprovalDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ApprovalDecision::Allowed)
    }
}

/// Stateless policy evaluation.
pub struct ApprovalPolicy;

impl ApprovalPolicy {
    pub fn evaluate(tool_name: &str, level: AutonomyLevel) -> ApprovalDecision {
        let category = ToolCategory::of(tool_name);
        let required = category.required_level();
        if level >= required {
            return ApprovalDecision::Allowed;
        }

        let reason = match category {
            ToolCategory::SecurityCritical => format!(
                "Security-critical operation '{tool_name}' requires approval at autonomy level {level}; only level {required} executes it directly"
            ),
            ToolCategory::Write => format!(
                "Write operation '{tool_name}' requires approval at autonomy level {level}; level {required} or higher executes it directly"
            ),
            // Reactive is the lowest tier, so this arm is never reached
            ToolCategory::Other => return ApprovalDecision::Allowed,
        };
        ApprovalDecision::RequiresApproval { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_known_tools() {
        assert_eq!(ToolCategory::of("git_push"), ToolCategory::SecurityCritical);
        assert_eq!(ToolCategory::of("write_file"), ToolCategory::Write);
        assert_eq!(ToolCategory::of("read_file"), ToolCategory::Other);
    }

    #[test]
    fn reads_always_allowed() {
        assert!(ApprovalPolicy::evaluate("read_file", AutonomyLevel::Reactive).is_allowed());
        assert!(ApprovalPolicy::evaluate("list_tasks", AutonomyLevel::Cautious).is_allowed());
    }

    #[test]
    fn writes_gated_below_balanced() {
        for level in [AutonomyLevel::Reactive, AutonomyLevel::Cautious] {
            assert!(!ApprovalPolicy::evaluate("write_file", level).is_allowed());
        }
        for level in [AutonomyLevel::Balanced, AutonomyLevel::FullAutonomy] {
            assert!(ApprovalPolicy::evaluate("create_branch", level).is_allowed());
        }
    }

    #[test]
    fn security_critical_needs_full_autonomy() {
        for level in [
            AutonomyLevel::Reactive,
            AutonomyLevel::Cautious,
            AutonomyLevel::Balanced,
        ] {
            assert!(!ApprovalPolicy::evaluate("execute_command", level).is_allowed());
        }
        assert!(ApprovalPolicy::evaluate("execute_command", AutonomyLevel::FullAutonomy).is_allowed());
    }

    #[test]
    fn reason_names_tool_and_tiers() {
        match ApprovalPolicy::evaluate("write_file", AutonomyLevel::Cautious) {
            ApprovalDecision::RequiresApproval { reason } => {
                assert!(reason.contains("write_file"));
                assert!(reason.contains("1 (cautious)"));
                assert!(reason.contains("2 (balanced)"));
            }
            other => panic!("expected approval, got {other:?}"),
        }
    }
}
