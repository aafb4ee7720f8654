//! Blocker detection: cheap circuit breakers over the worker's recent history.
//!
//! Three histories feed the detector:
//!
//! - per-file content fingerprints (last 10 per path)
//! - verification records (last 20)
//! - per-tool consecutive failure tallies
//!
//! Checks run in a fixed order (code loop, verification loop, tool failure)
//! and the first match wins.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use cronbot_core::blocker::{Blocker, BlockerKind, Severity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fingerprints kept per file.
pub const MAX_FINGERPRINTS: usize = 10;

/// Verification records kept in total.
pub const MAX_VERIFICATIONS: usize = 20;

/// Identical failed verifications that make a loop.
pub const VERIFICATION_WINDOW: usize = 5;

/// Consecutive failures after which a tool is considered broken.
pub const TOOL_FAILURE_THRESHOLD: u32 = 3;

/// Turns file content into a stable fingerprint.
pub trait ContentHasher: Send + Sync {
    fn fingerprint(&self, content: &[u8]) -> String;
}

/// SHA-256, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn fingerprint(&self, content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// `A,B,A,B` over the last four fingerprints of `path`, with `A != B`.
pub fn detect_code_loop(path: &str, fingerprints: &[String]) -> Option<Blocker> {
    let [a, b, c, d] = fingerprints.get(fingerprints.len().checked_sub(4)?..)? else {
        return None;
    };
    if a == c && b == d && a != b {
        return Some(Blocker {
            kind: BlockerKind::CodeLoop,
            severity: Severity::High,
            description: format!("File {path} is being changed back and forth between two states"),
            suggested_action:
                "Review the conflicting requirements and make a definitive decision".into(),
            subject: Some(path.into()),
        });
    }
    None
}

/// The last five verifications all failed with one identical message.
pub fn detect_verification_loop(records: &[VerificationRecord]) -> Option<Blocker> {
    let window = records.get(records.len().checked_sub(VERIFICATION_WINDOW)?..)?;
    let first = window.first()?;
    let stuck = window
        .iter()
        .all(|r| !r.success && r.message == first.message);
    stuck.then(|| Blocker {
        kind: BlockerKind::VerificationLoop,
        severity: Severity::High,
        description: format!(
            "Verification repeatedly failing with same error: {}",
            first.message
        ),
        suggested_action: "Try a different approach or escalate for human assistance".into(),
        subject: None,
    })
}

/// The first tool (by name) whose consecutive failures reached the threshold.
pub fn detect_tool_failure(tallies: &BTreeMap<String, u32>) -> Option<Blocker> {
    let (tool, count) = tallies
        .iter()
        .find(|(_, count)| **count >= TOOL_FAILURE_THRESHOLD)?;
    Some(Blocker {
        kind: BlockerKind::ToolFailure,
        severity: Severity::Medium,
        description: format!("Tool {tool} has failed {count} times in a row"),
        suggested_action: "Check tool configuration or try alternative approach".into(),
        subject: Some(tool.clone()),
    })
}

/// The three histories plus the hasher used to fingerprint file edits.
pub struct BlockerHistories {
    fingerprints: HashMap<String, VecDeque<String>>,
    verifications: VecDeque<VerificationRecord>,
    tool_failures: BTreeMap<String, u32>,
    hasher: Box<dyn ContentHasher>,
}

impl Default for BlockerHistories {
    fn default() -> Self {
        Self::new(Box::new(Sha256Hasher))
    }
}

impl BlockerHistories {
    pub fn new(hasher: Box<dyn ContentHasher>) -> Self {
        Self {
            fingerprints: HashMap::new(),
            verifications: VecDeque::new(),
            tool_failures: BTreeMap::new(),
            hasher,
        }
    }

    /// Fingerprint `content` and append it to the history of `path`.
    pub fn record_file_edit(&mut self, path: &str, content: &[u8]) {
        let fingerprint = self.hasher.fingerprint(content);
        let history = self.fingerprints.entry(path.to_string()).or_default();
        history.push_back(fingerprint);
        while history.len() > MAX_FINGERPRINTS {
            history.pop_front();
        }
    }

    pub fn record_verification(&mut self, success: bool, message: impl Into<String>) {
        self.verifications
            .push_back(VerificationRecord::new(success, message));
        while self.verifications.len() > MAX_VERIFICATIONS {
            self.verifications.pop_front();
        }
    }

    /// A failure bumps the tool's tally. Successes leave it alone: only
    /// [`reset_after`](Self::reset_after) and
    /// [`clear_tool_failures`](Self::clear_tool_failures) empty it.
    pub fn record_tool_result(&mut self, tool: &str, success: bool) {
        if !success {
            *self.tool_failures.entry(tool.to_string()).or_insert(0) += 1;
        }
    }

    /// Operator-requested reset of every tool's failure tally.
    pub fn clear_tool_failures(&mut self) {
        self.tool_failures.clear();
    }

    pub fn fingerprints(&self, path: &str) -> Vec<String> {
        self.fingerprints
            .get(path)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn verifications(&self) -> Vec<VerificationRecord> {
        self.verifications.iter().cloned().collect()
    }

    pub fn tool_failures(&self, tool: &str) -> u32 {
        self.tool_failures.get(tool).copied().unwrap_or(0)
    }

    /// Run every check in order; the first blocker found is returned.
    pub fn detect(&self) -> Option<Blocker> {
        let mut paths: Vec<&String> = self.fingerprints.keys().collect();
        paths.sort();
        for path in paths {
            let history: Vec<String> = self.fingerprints[path].iter().cloned().collect();
            if let Some(blocker) = detect_code_loop(path, &history) {
                return Some(blocker);
            }
        }

        let records: Vec<VerificationRecord> = self.verifications.iter().cloned().collect();
        if let Some(blocker) = detect_verification_loop(&records) {
            return Some(blocker);
        }

        detect_tool_failure(&self.tool_failures)
    }

    /// Clear the failure state behind `blocker` after its cooldown.
    ///
    /// Tool tallies and failed verifications are always cleared; a code loop
    /// also forgets the fingerprints of the offending file.
    pub fn reset_after(&mut self, blocker: &Blocker) {
        self.tool_failures.clear();
        self.verifications.retain(|v| v.success);
        if blocker.kind == BlockerKind::CodeLoop
            && let Some(path) = &blocker.subject
        {
            self.fingerprints.remove(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn failed(message: &str, n: usize) -> Vec<VerificationRecord> {
        (0..n).map(|_| VerificationRecord::new(false, message)).collect()
    }

    #[test]
    fn alternating_fingerprints_are_a_code_loop() {
        let blocker = detect_code_loop("src/lib.rs", &hashes(&["h1", "h2", "h1", "h2"])).unwrap();
        assert_eq!(blocker.kind, BlockerKind::CodeLoop);
        assert_eq!(blocker.severity, Severity::High);
        assert!(blocker.description.contains("src/lib.rs"));
    }

    #[test]
    fn distinct_fingerprints_are_progress() {
        assert!(detect_code_loop("a.rs", &hashes(&["h1", "h2", "h3", "h4"])).is_none());
        assert!(detect_code_loop("a.rs", &hashes(&["h1", "h1", "h1", "h1"])).is_none());
        assert!(detect_code_loop("a.rs", &hashes(&["h1", "h2", "h1"])).is_none());
    }

    #[test]
    fn only_the_last_four_fingerprints_count() {
        let history = hashes(&["h9", "h8", "h1", "h2", "h1", "h2"]);
        assert!(detect_code_loop("a.rs", &history).is_some());
        let history = hashes(&["h1", "h2", "h1", "h2", "h3"]);
        assert!(detect_code_loop("a.rs", &history).is_none());
    }

    #[test]
    fn five_identical_failures_are_a_verification_loop() {
        let blocker = detect_verification_loop(&failed("timeout", 5)).unwrap();
        assert_eq!(blocker.kind, BlockerKind::VerificationLoop);
        assert!(blocker.description.contains("timeout"));
    }

    #[test]
    fn four_failures_are_not_enough() {
        assert!(detect_verification_loop(&failed("timeout", 4)).is_none());
    }

    #[test]
    fn mixed_messages_or_a_success_break_the_loop() {
        let mut records = failed("timeout", 4);
        records.push(VerificationRecord::new(false, "assertion failed"));
        assert!(detect_verification_loop(&records).is_none());

        let mut records = failed("timeout", 4);
        records.push(VerificationRecord::new(true, "timeout"));
        assert!(detect_verification_loop(&records).is_none());
    }

    #[test]
    fn tool_failure_threshold() {
        let mut tallies = BTreeMap::new();
        tallies.insert("run_tests".to_string(), 2);
        assert!(detect_tool_failure(&tallies).is_none());
        tallies.insert("run_tests".to_string(), 3);
        let blocker = detect_tool_failure(&tallies).unwrap();
        assert_eq!(blocker.kind, BlockerKind::ToolFailure);
        assert_eq!(blocker.severity, Severity::Medium);
        assert_eq!(blocker.subject.as_deref(), Some("run_tests"));
    }

    #[test]
    fn successes_do_not_hide_accumulating_failures() {
        let mut histories = BlockerHistories::default();
        histories.record_tool_result("run_tests", false);
        histories.record_tool_result("run_tests", false);
        histories.record_tool_result("run_tests", true);
        assert_eq!(histories.tool_failures("run_tests"), 2);
        assert!(histories.detect().is_none());

        histories.record_tool_result("run_tests", false);
        let blocker = histories.detect().unwrap();
        assert_eq!(blocker.kind, BlockerKind::ToolFailure);
        assert_eq!(blocker.subject.as_deref(), Some("run_tests"));

        histories.reset_after(&blocker);
        assert_eq!(histories.tool_failures("run_tests"), 0);
    }

    #[test]
    fn operator_clear_empties_every_tally() {
        let mut histories = BlockerHistories::default();
        histories.record_tool_result("run_tests", false);
        histories.record_tool_result("git_push", false);
        histories.clear_tool_failures();
        assert_eq!(histories.tool_failures("run_tests"), 0);
        assert_eq!(histories.tool_failures("git_push"), 0);
    }

    #[test]
    fn code_loop_wins_over_later_checks() {
        let mut histories = BlockerHistories::default();
        for _ in 0..3 {
            histories.record_tool_result("git_push", false);
        }
        for content in ["a", "b", "a", "b"] {
            histories.record_file_edit("src/main.rs", content.as_bytes());
        }
        let blocker = histories.detect().unwrap();
        assert_eq!(blocker.kind, BlockerKind::CodeLoop);

        histories.reset_after(&blocker);
        assert!(histories.fingerprints("src/main.rs").is_empty());
        assert!(histories.detect().is_none());
    }

    #[test]
    fn histories_are_bounded() {
        let mut histories = BlockerHistories::default();
        for i in 0..15 {
            histories.record_file_edit("a.rs", format!("v{i}").as_bytes());
        }
        for _ in 0..25 {
            histories.record_verification(true, "ok");
        }
        assert_eq!(histories.fingerprints("a.rs").len(), MAX_FINGERPRINTS);
        assert_eq!(histories.verifications().len(), MAX_VERIFICATIONS);
    }

    #[test]
    fn reset_keeps_successful_verifications() {
        let mut histories = BlockerHistories::default();
        histories.record_verification(true, "ok");
        for _ in 0..5 {
            histories.record_verification(false, "timeout");
        }
        let blocker = histories.detect().unwrap();
        assert_eq!(blocker.kind, BlockerKind::VerificationLoop);

        histories.reset_after(&blocker);
        let remaining = histories.verifications();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].success);
    }

    #[test]
    fn sha256_fingerprints_are_stable() {
        let hasher = Sha256Hasher;
        assert_eq!(hasher.fingerprint(b"same"), hasher.fingerprint(b"same"));
        assert_ne!(hasher.fingerprint(b"same"), hasher.fingerprint(b"different"));
        assert_eq!(hasher.fingerprint(b"").len(), 64);
    }
}
