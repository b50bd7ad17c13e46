//! Code execution for programming questions.
//!
//! An [`Executor`] runs a candidate program against a batch of test cases
//! and always resolves to a terminal [`JudgeStatus`]. Timeouts and crashes
//! are classified as `runtime_error`; only a failure to run at all surfaces
//! as [`Error::JudgeUnavailable`](crate::error::Error::JudgeUnavailable).
//!
//! No resource isolation is applied beyond the wall-clock timeout.

pub mod driver;
pub mod process;
pub mod remote;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use process::ProcessExecutor;
pub use remote::RemoteExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "code_language", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    #[serde(alias = "js", alias = "node")]
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "judge_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JudgeStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Candidate source plus the function the driver calls for each case.
#[derive(Debug, Clone)]
pub struct Program {
    pub language: Language,
    pub source: String,
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub index: usize,
    pub input: String,
    pub expected_output: String,
    pub actual_output: Option<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    pub run_id: Uuid,
    pub status: JudgeStatus,
    pub passed: i32,
    pub total: i32,
    pub outputs: Vec<CaseOutcome>,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        program: &Program,
        tests: &[TestCase],
        timeout: Duration,
    ) -> Result<JudgeReport>;
}

/// Raw observations from one driver process.
#[derive(Debug, Clone, Default)]
pub struct RawRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_success: bool,
    pub timed_out: bool,
}

/// Matches stdout lines against expected outputs, one line per case.
pub fn compare_outputs(stdout: &str, tests: &[TestCase]) -> Vec<CaseOutcome> {
    let mut lines = stdout.lines();
    tests
        .iter()
        .enumerate()
        .map(|(index, case)| {
            let actual = lines.next().map(|l| l.trim().to_string());
            let passed = actual.as_deref() == Some(case.expected_output.trim());
            CaseOutcome {
                index,
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: actual,
                passed,
            }
        })
        .collect()
}

pub fn classify(raw: &RawRun, tests: &[TestCase]) -> (JudgeStatus, Vec<CaseOutcome>) {
    if raw.timed_out {
        let outcomes = compare_outputs("", tests);
        return (JudgeStatus::RuntimeError, outcomes);
    }

    let outcomes = compare_outputs(&raw.stdout, tests);
    let status = if !raw.exit_success || !raw.stderr.trim().is_empty() {
        JudgeStatus::RuntimeError
    } else if outcomes.iter().all(|o| o.passed) {
        JudgeStatus::Accepted
    } else {
        JudgeStatus::WrongAnswer
    };
    (status, outcomes)
}

pub fn passed_count(outcomes: &[CaseOutcome]) -> i32 {
    outcomes.iter().filter(|o| o.passed).count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase { input: "1, 2".into(), expected_output: "3".into() },
            TestCase { input: "2, 2".into(), expected_output: "4".into() },
        ]
    }

    #[test]
    fn all_lines_matching_is_accepted() {
        let raw = RawRun { stdout: "3\n 4 \n".into(), exit_success: true, ..Default::default() };
        let (status, outcomes) = classify(&raw, &cases());
        assert_eq!(status, JudgeStatus::Accepted);
        assert_eq!(passed_count(&outcomes), 2);
    }

    #[test]
    fn clean_exit_with_mismatch_is_wrong_answer() {
        let raw = RawRun { stdout: "3\n5\n".into(), exit_success: true, ..Default::default() };
        let (status, outcomes) = classify(&raw, &cases());
        assert_eq!(status, JudgeStatus::WrongAnswer);
        assert_eq!(passed_count(&outcomes), 1);
        assert_eq!(outcomes[1].actual_output.as_deref(), Some("5"));
    }

    #[test]
    fn missing_lines_fail_their_cases() {
        let raw = RawRun { stdout: "3\n".into(), exit_success: true, ..Default::default() };
        let (status, outcomes) = classify(&raw, &cases());
        assert_eq!(status, JudgeStatus::WrongAnswer);
        assert_eq!(outcomes[1].actual_output, None);
    }

    #[test]
    fn stderr_or_bad_exit_is_runtime_error() {
        let noisy = RawRun {
            stdout: "3\n4\n".into(),
            stderr: "warning".into(),
            exit_success: true,
            ..Default::default()
        };
        assert_eq!(classify(&noisy, &cases()).0, JudgeStatus::RuntimeError);

        let crashed = RawRun { stdout: "3\n".into(), exit_success: false, ..Default::default() };
        let (status, outcomes) = classify(&crashed, &cases());
        assert_eq!(status, JudgeStatus::RuntimeError);
        assert_eq!(passed_count(&outcomes), 1);
    }

    #[test]
    fn timeout_passes_nothing() {
        let raw = RawRun { stdout: "3\n4\n".into(), timed_out: true, ..Default::default() };
        let (status, outcomes) = classify(&raw, &cases());
        assert_eq!(status, JudgeStatus::RuntimeError);
        assert_eq!(passed_count(&outcomes), 0);
    }

    #[test]
    fn language_accepts_aliases() {
        let lang: Language = serde_json::from_str("\"js\"").unwrap();
        assert_eq!(lang, Language::Javascript);
        assert_eq!(serde_json::to_string(&Language::Python).unwrap(), "\"python\"");
    }
}
