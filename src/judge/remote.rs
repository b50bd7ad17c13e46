use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CaseOutcome, Executor, JudgeReport, JudgeStatus, Language, Program, TestCase};
use crate::error::{Error, Result};

/// Delegates execution to an external judge service over HTTP.
#[derive(Clone)]
pub struct RemoteExecutor {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    language: Language,
    code: &'a str,
    entry_point: &'a str,
    test_cases: Vec<RemoteCase<'a>>,
    timeout_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCase<'a> {
    input: &'a str,
    expected_output: &'a str,
}

#[derive(Deserialize)]
struct RunResponse {
    status: JudgeStatus,
    passed: i32,
    total: i32,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    timed_out: bool,
}

impl RemoteExecutor {
    pub fn new(base_url: String, client: Client) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait::async_trait]
impl Executor for RemoteExecutor {
    async fn run(&self, program: &Program, tests: &[TestCase], timeout: Duration) -> Result<JudgeReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let body = RunRequest {
            language: program.language,
            code: &program.source,
            entry_point: &program.entry_point,
            test_cases: tests
                .iter()
                .map(|t| RemoteCase { input: &t.input, expected_output: &t.expected_output })
                .collect(),
            timeout_ms: timeout.as_millis() as u64,
        };

        // The service enforces the run budget; allow it time to answer.
        let resp = self
            .client
            .post(format!("{}/run", self.base_url))
            .timeout(timeout + Duration::from_secs(5))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::JudgeUnavailable(format!("judge request failed: {}", e)))?;

        let parsed: RunResponse = resp
            .json()
            .await
            .map_err(|e| Error::JudgeUnavailable(format!("judge returned an unreadable body: {}", e)))?;

        let outputs: Vec<CaseOutcome> = tests
            .iter()
            .enumerate()
            .map(|(index, case)| {
                let actual = parsed.outputs.get(index).map(|s| s.trim().to_string());
                CaseOutcome {
                    index,
                    input: case.input.clone(),
                    expected_output: case.expected_output.clone(),
                    passed: actual.as_deref() == Some(case.expected_output.trim()),
                    actual_output: actual,
                }
            })
            .collect();

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(%run_id, status = ?parsed.status, passed = parsed.passed, total = parsed.total, duration_ms, "remote judge run finished");

        Ok(JudgeReport {
            run_id,
            status: parsed.status,
            passed: parsed.passed.clamp(0, tests.len() as i32),
            total: tests.len() as i32,
            outputs,
            stderr: parsed.stderr.unwrap_or_default(),
            timed_out: parsed.timed_out,
            duration_ms,
        })
    }
}
