//! Executor that runs a configured external command for a phase.
//!
//! Protocol:
//! - stdin: one JSON object `{"phase": "...", "inputs": {...}}`, then EOF
//! - stdout: free text, optionally with `{"type":"result", ...}` JSON lines
//!   carrying the final result and usage
//! - non-zero exit: failure, with stderr as the message

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{PhaseExecutor, PhaseInputs, PhaseOutput, Usage};
use crate::phase::Phase;
use crate::retry::classify::{FailureKind, WorkerFailure};

fn default_worker() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    1800
}

/// `[executors.<phase>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_worker")]
    pub worker: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            worker: default_worker(),
            timeout_secs: default_timeout_secs(),
            env: BTreeMap::new(),
        }
    }
}

/// Lines on stdout that the executor understands.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecutorEvent {
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct ExecutorRequest<'a> {
    phase: &'a str,
    inputs: &'a PhaseInputs,
}

/// Accumulates stdout into a result.
#[derive(Debug, Default)]
struct OutputCollector {
    text: String,
    result: Option<String>,
    usage: Usage,
    is_error: bool,
}

impl OutputCollector {
    fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<ExecutorEvent>(line) {
            Ok(ExecutorEvent::Result {
                result,
                usage,
                is_error,
            }) => {
                if result.is_some() {
                    self.result = result;
                }
                if let Some(usage) = usage {
                    self.usage.input_units += usage.input_units;
                    self.usage.output_units += usage.output_units;
                }
                self.is_error |= is_error;
            }
            Ok(ExecutorEvent::Other) => {}
            Err(_) => {
                // Plain text output
                self.text.push_str(line);
                self.text.push('\n');
            }
        }
    }

    fn finish(self) -> (PhaseOutput, bool) {
        let result = self.result.unwrap_or(self.text);
        (
            PhaseOutput {
                result: result.trim().to_string(),
                usage: self.usage,
            },
            self.is_error,
        )
    }
}

pub struct CommandExecutor {
    spec: CommandSpec,
}

impl CommandExecutor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run_process(
        &self,
        phase: Phase,
        inputs: &PhaseInputs,
        workspace: &Path,
    ) -> Result<PhaseOutput> {
        let request = serde_json::to_string(&ExecutorRequest {
            phase: phase.key(),
            inputs,
        })
        .context("Failed to serialize phase inputs")?;

        let mut child = Command::new(&self.spec.command)
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .env("CONDUCTOR_PHASE", phase.key())
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn executor command '{}'", self.spec.command))?;

        debug!(phase = %phase, pid = child.id().unwrap_or(0), "Executor process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores its input may exit before reading it.
            match stdin.write_all(request.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(phase = %phase, "Executor closed stdin early");
                }
                other => other.context("Failed to write executor stdin")?,
            }
            drop(stdin);
        }

        let stdout = child.stdout.take().context("Failed to capture executor stdout")?;
        let mut stderr = child.stderr.take().context("Failed to capture executor stderr")?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut collector = OutputCollector::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read executor stdout")?
        {
            collector.push_line(&line);
        }

        let status = child.wait().await.context("Failed to wait for executor")?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            bail!(
                "Executor for phase {} exited with code {}: {}",
                phase,
                code,
                stderr_text.trim()
            );
        }

        let (output, is_error) = collector.finish();
        if is_error {
            bail!("Executor for phase {} reported an error: {}", phase, output.result);
        }
        Ok(output)
    }
}

#[async_trait]
impl PhaseExecutor for CommandExecutor {
    fn worker(&self) -> &str {
        &self.spec.worker
    }

    async fn execute(
        &self,
        phase: Phase,
        inputs: &PhaseInputs,
        workspace: &Path,
    ) -> Result<PhaseOutput> {
        let start = Instant::now();
        let limit = Duration::from_secs(self.spec.timeout_secs.max(1));

        let output = match tokio::time::timeout(limit, self.run_process(phase, inputs, workspace))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(phase = %phase, timeout_secs = limit.as_secs(), "Executor timed out");
                return Err(WorkerFailure::new(
                    FailureKind::Timeout,
                    format!(
                        "Executor for phase {} timed out after {}s",
                        phase,
                        limit.as_secs()
                    ),
                )
                .into());
            }
        };

        info!(
            phase = %phase,
            elapsed_secs = start.elapsed().as_secs_f64(),
            input_units = output.usage.input_units,
            output_units = output.usage.output_units,
            "Executor finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::classify::{TextClassifier, classify_error};
    use tempfile::tempdir;

    #[test]
    fn test_collector_prefers_result_event() {
        let mut c = OutputCollector::default();
        c.push_line("thinking...");
        c.push_line(r#"{"type":"progress","message":"half way"}"#);
        c.push_line(
            r#"{"type":"result","result":"final text","usage":{"input_units":120,"output_units":30}}"#,
        );
        let (output, is_error) = c.finish();
        assert_eq!(output.result, "final text");
        assert_eq!(output.usage.input_units, 120);
        assert_eq!(output.usage.output_units, 30);
        assert!(!is_error);
    }

    #[test]
    fn test_collector_falls_back_to_plain_text() {
        let mut c = OutputCollector::default();
        c.push_line("line one");
        c.push_line("");
        c.push_line("line two");
        let (output, _) = c.finish();
        assert_eq!(output.result, "line one\nline two");
        assert_eq!(output.usage, Usage::default());
    }

    #[test]
    fn test_collector_flags_error_result() {
        let mut c = OutputCollector::default();
        c.push_line(r#"{"type":"result","result":"429 rate limit","is_error":true}"#);
        let (_, is_error) = c.finish();
        assert!(is_error);
    }

    #[test]
    fn test_command_spec_defaults_from_toml() {
        let spec: CommandSpec = toml::from_str(r#"command = "agent""#).unwrap();
        assert_eq!(spec.command, "agent");
        assert_eq!(spec.worker, "default");
        assert_eq!(spec.timeout_secs, 1800);
        assert!(spec.args.is_empty());
    }

    fn shell(script: &str) -> CommandExecutor {
        let mut spec = CommandSpec::new("sh");
        spec.args = vec!["-c".to_string(), script.to_string()];
        spec.worker = "shell".to_string();
        CommandExecutor::new(spec)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_receives_inputs_on_stdin() {
        let dir = tempdir().unwrap();
        let exec = shell("cat > request.json; echo done");
        let mut inputs = PhaseInputs::new();
        inputs.insert("idea".into(), "todo app".into());

        let output = exec.execute(Phase::Meta, &inputs, dir.path()).await.unwrap();
        assert_eq!(output.result, "done");

        let request: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
                .unwrap();
        assert_eq!(request["phase"], "meta");
        assert_eq!(request["inputs"]["idea"], "todo app");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_nonzero_exit_carries_stderr() {
        let dir = tempdir().unwrap();
        let exec = shell("echo '429 Too Many Requests, retry in 3s' >&2; exit 1");
        let err = exec
            .execute(Phase::Designer, &PhaseInputs::new(), dir.path())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("retry in 3s"));

        let classified = classify_error(&err, &TextClassifier);
        assert_eq!(classified.kind, FailureKind::RateLimited);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout_is_classified() {
        let dir = tempdir().unwrap();
        let mut exec = shell("sleep 5");
        exec.spec.timeout_secs = 1;
        let err = exec
            .execute(Phase::Development, &PhaseInputs::new(), dir.path())
            .await
            .unwrap_err();
        let failure = err.downcast_ref::<WorkerFailure>().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("timed out after 1s"));
    }
}
