//! Blocker value types: a structured "the worker is stuck" report.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    /// A file is edited back and forth between two states
    CodeLoop,
    /// Verification keeps failing with the same message
    VerificationLoop,
    /// One tool keeps failing
    ToolFailure,
}

impl BlockerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockerKind::CodeLoop => "code_loop",
            BlockerKind::VerificationLoop => "verification_loop",
            BlockerKind::ToolFailure => "tool_failure",
        }
    }
}

impl std::fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub kind: BlockerKind,
    pub severity: Severity,
    pub description: String,
    pub suggested_action: String,

    /// The file path or tool name the blocker is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl std::fmt::Display for Blocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.kind, self.severity, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocker_serializes_snake_case() {
        let blocker = Blocker {
            kind: BlockerKind::ToolFailure,
            severity: Severity::Medium,
            description: "Tool git_push has failed 3 times".into(),
            suggested_action: "Check tool configuration".into(),
            subject: Some("git_push".into()),
        };
        let json = serde_json::to_value(&blocker).unwrap();
        assert_eq!(json["kind"], "tool_failure");
        assert_eq!(json["severity"], "medium");
        assert_eq!(blocker.to_string(), "[tool_failure/medium] Tool git_push has failed 3 times");
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
