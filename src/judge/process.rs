use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use uuid::Uuid;

use super::{classify, driver, passed_count, Executor, JudgeReport, Language, Program, RawRun, TestCase};
use crate::error::{Error, Result};

/// Captured bytes per stream. Anything past this closes the pipe.
pub const MAX_OUTPUT_BYTES: u64 = 64 * 1024;

/// Runs candidate code with a local interpreter as a child process.
///
/// The wrapped program lives in a fresh temporary directory that is removed
/// when the run returns, on every path. The child gets a cleared environment
/// (PATH only), a null stdin, and is killed when the timeout fires. Output
/// beyond [`MAX_OUTPUT_BYTES`] per stream is discarded and the run counts as
/// a runtime error.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    python_bin: String,
    node_bin: String,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new("python3".to_string(), "node".to_string())
    }
}

impl ProcessExecutor {
    pub fn new(python_bin: String, node_bin: String) -> Self {
        Self { python_bin, node_bin }
    }

    fn interpreter(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python_bin,
            Language::Javascript => &self.node_bin,
        }
    }

    async fn spawn_and_wait(&self, program: &Program, tests: &[TestCase], timeout: Duration) -> Result<RawRun> {
        let dir = tempfile::Builder::new().prefix("judge-").tempdir()?;
        let path = dir.path().join(driver::file_name(program.language));
        tokio::fs::write(&path, driver::wrap(program, tests)).await?;

        let path_env = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
        let mut child = Command::new(self.interpreter(program.language))
            .arg(&path)
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", &path_env)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::JudgeUnavailable(format!(
                    "failed to start {} interpreter: {}",
                    program.language.as_str(),
                    e
                ))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (out, err) = tokio::join!(read_capped(stdout), read_capped(stderr));
            (out, err, child.wait().await)
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        let raw = match outcome {
            Ok(((stdout, stdout_cut), (stderr, stderr_cut), Ok(status))) => {
                let mut stderr = String::from_utf8_lossy(&stderr).to_string();
                if stdout_cut || stderr_cut {
                    if !stderr.is_empty() {
                        stderr.push('\n');
                    }
                    stderr.push_str(&format!("output limit of {} bytes exceeded", MAX_OUTPUT_BYTES));
                }
                RawRun {
                    stdout: String::from_utf8_lossy(&stdout).to_string(),
                    stderr,
                    exit_success: status.success(),
                    timed_out: false,
                }
            }
            Ok((_, _, Err(e))) => RawRun {
                stderr: format!("process error: {}", e),
                ..Default::default()
            },
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "timed-out judge process already exited");
                }
                RawRun {
                    stderr: format!("time limit of {} ms exceeded", timeout.as_millis()),
                    timed_out: true,
                    ..Default::default()
                }
            }
        };

        drop(dir);
        Ok(raw)
    }
}

/// Reads at most [`MAX_OUTPUT_BYTES`] from a child pipe. The flag is set when
/// the stream had more.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let Some(reader) = reader else {
        return (buf, false);
    };
    if let Err(e) = reader.take(MAX_OUTPUT_BYTES + 1).read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "judge output pipe read failed");
    }
    let truncated = buf.len() as u64 > MAX_OUTPUT_BYTES;
    buf.truncate(MAX_OUTPUT_BYTES as usize);
    (buf, truncated)
}

#[async_trait::async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, program: &Program, tests: &[TestCase], timeout: Duration) -> Result<JudgeReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let raw = self.spawn_and_wait(program, tests, timeout).await?;
        let (status, outputs) = classify(&raw, tests);
        let duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            %run_id,
            language = program.language.as_str(),
            ?status,
            timed_out = raw.timed_out,
            duration_ms,
            "judge run finished"
        );

        Ok(JudgeReport {
            run_id,
            status,
            passed: passed_count(&outputs),
            total: tests.len() as i32,
            outputs,
            stderr: raw.stderr,
            timed_out: raw.timed_out,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::JudgeStatus;

    fn available(bin: &str) -> bool {
        std::process::Command::new(bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn python_available() -> bool {
        available("python3")
    }

    fn add_cases() -> Vec<TestCase> {
        vec![
            TestCase { input: "1, 2".into(), expected_output: "3".into() },
            TestCase { input: "5, 5".into(), expected_output: "10".into() },
        ]
    }

    fn python(source: &str) -> Program {
        Program { language: Language::Python, source: source.into(), entry_point: "solve".into() }
    }

    fn javascript(source: &str) -> Program {
        Program { language: Language::Javascript, source: source.into(), entry_point: "solve".into() }
    }

    #[tokio::test]
    async fn accepted_solution_passes_every_case() {
        if !python_available() {
            return;
        }
        let report = ProcessExecutor::default()
            .run(&python("def solve(a, b):\n    return a + b\n"), &add_cases(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.status, JudgeStatus::Accepted, "stderr: {}", report.stderr);
        assert_eq!((report.passed, report.total), (2, 2));
    }

    #[tokio::test]
    async fn infinite_loop_is_killed_and_classified() {
        if !python_available() {
            return;
        }
        let started = Instant::now();
        let report = ProcessExecutor::default()
            .run(&python("def solve(a, b):\n    while True:\n        pass\n"), &add_cases(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.timed_out);
        assert_eq!(report.status, JudgeStatus::RuntimeError);
        assert_eq!(report.passed, 0);
    }

    #[tokio::test]
    async fn exception_is_runtime_error() {
        if !python_available() {
            return;
        }
        let report = ProcessExecutor::default()
            .run(&python("def solve(a, b):\n    raise ValueError('boom')\n"), &add_cases(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.status, JudgeStatus::RuntimeError);
        assert!(report.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_unavailable() {
        let executor = ProcessExecutor::new("definitely-not-a-python-binary".into(), "node".into());
        let err = executor
            .run(&python("def solve(a, b):\n    return a + b\n"), &add_cases(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JudgeUnavailable(_)));
    }

    #[tokio::test]
    async fn flooding_output_is_capped() {
        if !python_available() {
            return;
        }
        let report = ProcessExecutor::default()
            .run(
                &python("def solve(a, b):\n    print('x' * 1000000, flush=True)\n    return a + b\n"),
                &add_cases(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(report.status, JudgeStatus::RuntimeError);
        assert!(report.stderr.contains("output limit"), "stderr: {}", report.stderr);
        assert!(report.stderr.len() <= MAX_OUTPUT_BYTES as usize + 64);
    }

    #[tokio::test]
    async fn javascript_solution_is_judged_with_node() {
        if !available("node") {
            return;
        }
        let executor = ProcessExecutor::default();
        let report = executor
            .run(&javascript("function solve(a, b) {\n  return a + b;\n}\n"), &add_cases(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.status, JudgeStatus::Accepted, "stderr: {}", report.stderr);
        assert_eq!((report.passed, report.total), (2, 2));

        let report = executor
            .run(&javascript("function solve(a, b) {\n  return a - b;\n}\n"), &add_cases(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.status, JudgeStatus::WrongAnswer);
        assert_eq!(report.passed, 0);

        let report = executor
            .run(&javascript("function solve(a, b) {\n  for (;;) {}\n}\n"), &add_cases(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.status, JudgeStatus::RuntimeError);
    }
}
