//! Activities run as external commands
//!
//! The input payload is written to the child's stdin and its stdout is parsed
//! as the JSON result. A non-zero exit status fails the activity with the
//! tail of stderr as the message. On cancellation the child is killed and
//! reaped before the handler returns; `kill_on_drop` covers the case where the
//! handler future is dropped instead.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use flowlane_core::limits;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::context::ActivityContext;
use super::error::{ActivityError, ActivityResult};
use super::input::ActivityInput;

const STDERR_TAIL: usize = 2048;

/// Largest stdout kept: a result at the details limit plus surrounding
/// whitespace
const MAX_STDOUT: usize = limits::MAX_DETAILS_LEN + 64;

/// How to launch the command for one activity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

/// Read at most `limit` bytes of `reader`, then drain and drop the rest so
/// the child never blocks on a full pipe. The flag tells whether anything
/// was dropped.
async fn read_head<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return Ok((buf, false));
    };
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((buf, dropped > 0))
}

/// Read `reader` to the end, keeping only the last `limit` bytes
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(buf);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 2 * limit {
            buf.drain(..buf.len() - limit);
        }
    }
}

struct Output {
    status: ExitStatus,
    stdout: Vec<u8>,
    stdout_overflow: bool,
    stderr: Vec<u8>,
}

async fn collect_output(child: &mut Child, payload: String) -> io::Result<Output> {
    let stdin = child.stdin.take();
    let write = async move {
        if let Some(mut stdin) = stdin {
            match stdin.write_all(payload.as_bytes()).await {
                // The command may exit without reading its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
                other => other?,
            }
            stdin.shutdown().await?;
        }
        Ok::<_, io::Error>(())
    };
    let (_, (stdout, stdout_overflow), stderr) = tokio::try_join!(
        write,
        read_head(child.stdout.take(), MAX_STDOUT),
        read_tail(child.stderr.take(), STDERR_TAIL)
    )?;
    let status = child.wait().await?;
    Ok(Output {
        status,
        stdout,
        stdout_overflow,
        stderr,
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Run `spec` for one activity invocation
pub async fn run_command(
    spec: &CommandSpec,
    ctx: &ActivityContext,
    input: &ActivityInput,
) -> ActivityResult<Value> {
    let payload = input.to_payload()?;
    let mut child = spec.command().spawn().map_err(|e| {
        ActivityError::new("SpawnError", format!("{}: {}", spec.program, e))
    })?;
    let _pid = child.id().map(|pid| ctx.track_pid(pid));
    debug!(
        activity_id = %ctx.activity_id(),
        program = %spec.program,
        pid = ?child.id(),
        "Started command"
    );

    let collected = tokio::select! {
        output = collect_output(&mut child, payload) => Some(output),
        _ = ctx.cancelled() => None,
    };

    let Some(output) = collected else {
        if let Err(e) = child.kill().await {
            warn!(activity_id = %ctx.activity_id(), error = %e, "Failed to kill command");
        }
        return Err(ActivityError::new("Canceled", "command killed on cancellation"));
    };

    let output = output?;
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(ActivityError::new(
            "CommandFailed",
            format!(
                "{} exited with {}: {}",
                spec.program,
                code,
                stderr_tail(&output.stderr)
            ),
        ));
    }
    if output.stdout_overflow {
        return Err(ActivityError::new(
            "ResultTooLarge",
            format!("{} wrote more than {} bytes", spec.program, MAX_STDOUT),
        ));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
        .map_err(|e| ActivityError::new("InvalidOutput", format!("stdout is not JSON: {}", e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::activity_task;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> ActivityContext {
        ActivityContext::new(activity_task("tok", "cmd-0", "cmd", json!(null)))
    }

    #[tokio::test]
    async fn test_cat_echoes_input() {
        let input = ActivityInput::args(vec![json!(3), json!(4)]);
        let out = run_command(&CommandSpec::new("cat"), &context(), &input)
            .await
            .unwrap();
        assert_eq!(out, json!({"args": [3, 4], "kwargs": {}}));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let err = run_command(&spec, &context(), &ActivityInput::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, "CommandFailed");
        assert!(err.message.contains("3"));
        assert!(err.message.contains("oops"));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let ctx = context();
        let token = ctx.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let spec = CommandSpec::new("sleep").arg("30");
        let started = std::time::Instant::now();
        let err = run_command(&spec, &ctx, &ActivityInput::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, "Canceled");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(ctx.pids().is_empty());
    }

    #[tokio::test]
    async fn test_output_flood_is_capped() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "head -c 1000000 /dev/zero | tr '\\0' x; head -c 1000000 /dev/zero | tr '\\0' e >&2",
        ]);
        let err = run_command(&spec, &context(), &ActivityInput::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, "ResultTooLarge");

        let spec = CommandSpec::new("sh").args([
            "-c",
            "head -c 1000000 /dev/zero | tr '\\0' e >&2; echo done >&2; exit 1",
        ]);
        let err = run_command(&spec, &context(), &ActivityInput::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, "CommandFailed");
        assert!(err.message.ends_with("done"));
        assert!(err.message.len() < STDERR_TAIL + 64);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-command-4711");
        let err = run_command(&spec, &context(), &ActivityInput::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, "SpawnError");
    }
}
