//! Activity handlers run in task processes
//!
//! With process isolation the worker starts an executable once per task with
//! [`TASK_PROCESS_ENV`] set. That executable calls [`serve_task`] at the top
//! of `main`: it reads the task as one JSON line on stdin, runs the
//! registered handler and answers with JSON lines on stdout, heartbeat
//! details while the handler runs and then its outcome. Closing the task
//! process's stdin asks the handler to stop. Killing the process is the
//! fallback, so a handler that blocks or spins never outlives its slot.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use flowlane_core::{limits, ActivityTask};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::context::ActivityContext;
use super::error::{encode_result, ActivityError, ActivityResult};
use super::input::ActivityInput;
use super::registry::ActivityRegistry;
use crate::worker::supervisor::PidSet;

/// Set in the environment of every task process
pub const TASK_PROCESS_ENV: &str = "FLOWLANE_TASK_PROCESS";

/// Longest line accepted in either direction. Leaves room for escaping a
/// payload at the details limit.
const MAX_LINE_LEN: usize = 4 * limits::MAX_DETAILS_LEN + 4096;

/// Time a task process gets to exit once it has reported
const EXIT_WAIT: Duration = Duration::from_secs(1);

/// One line written by a task process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskMessage {
    Heartbeat(String),
    Completed(Value),
    Failed(ActivityError),
}

/// Reads newline-delimited JSON of bounded length.
///
/// A partial line survives a dropped `next_message` call, so the reader can
/// sit in a `select!` loop.
struct LineReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Next complete line without its newline, `None` at end of input
    async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if self.line.len() >= MAX_LINE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line longer than {} bytes", MAX_LINE_LEN),
                ));
            }
            let room = (MAX_LINE_LEN - self.line.len()) as u64;
            let read = (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.line)
                .await?;
            if self.line.last() == Some(&b'\n') {
                self.line.pop();
                return Ok(Some(std::mem::take(&mut self.line)));
            }
            if read == 0 {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.line)));
            }
        }
    }

    /// Next line that parses as `T`. Other lines are skipped.
    async fn next_message<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(&line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => debug!(error = %e, len = line.len(), "Skipping a line that is not a message"),
            }
        }
    }
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Serve the task handed to this process, if it was started as a task
/// process.
///
/// Returns the code to exit with, or `None` in any other process. Handlers
/// must not write to stdout, which carries the replies.
///
/// ```ignore
/// let registry = build_registry();
/// if let Some(code) = flowlane::activity::serve_task(&registry).await {
///     std::process::exit(code);
/// }
/// ```
pub async fn serve_task(registry: &ActivityRegistry) -> Option<i32> {
    std::env::var_os(TASK_PROCESS_ENV)?;
    match run_task(registry, tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => Some(0),
        Err(e) => {
            error!(error = %e, "Task process could not serve its task");
            Some(1)
        }
    }
}

/// Serve one task read from `input`, replying on `output`. The end of
/// `input` after the task line cancels the handler.
pub async fn run_task<R, W>(registry: &ActivityRegistry, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let mut reader = LineReader::new(input);
    let task: ActivityTask = reader.next_message().await?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "no task received on stdin")
    })?;

    let cancel = CancellationToken::new();
    let watch = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut reader.reader, &mut tokio::io::sink()).await;
            cancel.cancel();
        })
    };

    let (sink, mut beats) = mpsc::unbounded_channel();
    let ctx = Arc::new(
        ActivityContext::with_parts(
            Arc::new(task),
            cancel,
            Arc::new(Mutex::new(None)),
            PidSet::new(),
        )
        .with_heartbeat_sink(sink),
    );

    let run = execute(registry, Arc::clone(&ctx));
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Some(details) = beats.recv() => {
                write_message(&mut output, &TaskMessage::Heartbeat(details)).await?;
            }
        }
    };
    while let Ok(details) = beats.try_recv() {
        write_message(&mut output, &TaskMessage::Heartbeat(details)).await?;
    }

    let message = match result.and_then(|value| encode_result(&value).map(|_| value)) {
        Ok(value) => TaskMessage::Completed(value),
        Err(error) => TaskMessage::Failed(error),
    };
    write_message(&mut output, &message).await?;
    watch.abort();
    Ok(())
}

async fn execute(registry: &ActivityRegistry, ctx: Arc<ActivityContext>) -> ActivityResult<Value> {
    let activity = registry.dispatch(ctx.activity_type())?;
    let input = ActivityInput::from_payload(ctx.task().input.as_deref())?;
    tokio::spawn(activity.execute(ctx, input)).await?
}

fn task_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.env(TASK_PROCESS_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    cmd
}

fn describe(status: io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match status.code() {
            Some(code) => format!("code {}", code),
            None => "a signal".to_string(),
        },
        Err(e) => e.to_string(),
    }
}

/// Kill the process and reap it
async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill task process");
    }
}

/// Give the process a moment to exit on its own, then kill it
async fn reap(child: &mut Child) -> io::Result<ExitStatus> {
    match tokio::time::timeout(EXIT_WAIT, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            kill(child).await;
            child.wait().await
        }
    }
}

enum Ended {
    Reported(ActivityResult<Value>),
    Closed,
    Invalid(io::Error),
    Killed,
}

/// Run `task` in a task process started from `program`.
///
/// Heartbeat details the process reports are recorded on `ctx`. Cancelling
/// `ctx` closes the process's stdin and leaves it `grace` to report; after
/// that, or as soon as `terminate` fires, the process is killed. Returns
/// `None` when the process was killed before it reported. The process is
/// reaped before this returns.
pub async fn run_in_process(
    program: &Path,
    task: &ActivityTask,
    ctx: &ActivityContext,
    terminate: &CancellationToken,
    grace: Duration,
) -> Option<ActivityResult<Value>> {
    let mut child = match task_command(program).spawn() {
        Ok(child) => child,
        Err(e) => {
            return Some(Err(ActivityError::new(
                "SpawnError",
                format!("{}: {}", program.display(), e),
            )))
        }
    };
    let pid = child.id();
    let _tracked = pid.map(|pid| ctx.track_pid(pid));
    debug!(pid = ?pid, program = %program.display(), "Started task process");

    let mut stdin = child.stdin.take();
    if let Some(writer) = stdin.as_mut() {
        tokio::select! {
            written = write_message(writer, task) => {
                if let Err(e) = written {
                    warn!(error = %e, "Failed to hand the task to its process");
                }
            }
            _ = terminate.cancelled() => {
                kill(&mut child).await;
                return None;
            }
            _ = ctx.cancelled() => {
                kill(&mut child).await;
                return None;
            }
        }
    }

    let Some(stdout) = child.stdout.take() else {
        kill(&mut child).await;
        return Some(Err(ActivityError::new("SpawnError", "task process has no stdout")));
    };
    let mut reader = LineReader::new(stdout);
    let mut deadline: Option<Instant> = None;

    let ended = loop {
        tokio::select! {
            biased;
            _ = terminate.cancelled() => break Ended::Killed,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                break Ended::Killed
            }
            _ = ctx.cancelled(), if deadline.is_none() => {
                debug!("Asking the task process to stop");
                drop(stdin.take());
                deadline = Some(Instant::now() + grace);
            }
            message = reader.next_message::<TaskMessage>() => match message {
                Ok(Some(TaskMessage::Heartbeat(details))) => ctx.record_heartbeat(details),
                Ok(Some(TaskMessage::Completed(value))) => break Ended::Reported(Ok(value)),
                Ok(Some(TaskMessage::Failed(error))) => break Ended::Reported(Err(error)),
                Ok(None) => break Ended::Closed,
                Err(e) => break Ended::Invalid(e),
            },
        }
    };
    drop(stdin);

    match ended {
        Ended::Reported(result) => {
            if let Err(e) = reap(&mut child).await {
                warn!(error = %e, "Failed to reap task process");
            }
            Some(result)
        }
        Ended::Closed => {
            let status = reap(&mut child).await;
            Some(Err(ActivityError::new(
                "ProcessExited",
                format!("task process exited with {} before reporting", describe(status)),
            )))
        }
        Ended::Invalid(e) => {
            kill(&mut child).await;
            Some(Err(ActivityError::new("InvalidOutput", e.to_string())))
        }
        Ended::Killed => {
            warn!(pid = ?pid, "Killing task process");
            kill(&mut child).await;
            None
        }
    }
}
