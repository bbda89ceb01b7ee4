/// Interpreter seam - one disposable Python process per session
///
/// **Core Responsibility:**
/// Start an isolated interpreter, submit source to it, and surface its
/// message stream as typed values.
///
/// **Critical Architectural Boundary:**
/// - The engine consumes `KernelMessage`s; it never sees process plumbing
/// - The factory is injected, so tests drive the engine with a scripted
///   interpreter instead of a real process
/// - One interpreter per session; nothing is shared across requests
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Rich-output payload attached to display and result messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichPayload {
    #[serde(rename = "image/png", default, skip_serializing_if = "Option::is_none")]
    pub image_png: Option<String>,
    #[serde(rename = "text/plain", default, skip_serializing_if = "Option::is_none")]
    pub text_plain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Busy,
    Idle,
}

/// One message from the interpreter's output stream.
///
/// Mirrors the iopub message kinds the execution engine classifies:
/// raw stream fragments, rich outputs, errors, and state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum KernelMessage {
    Stream {
        text: String,
    },
    DisplayData {
        data: RichPayload,
    },
    ExecuteResult {
        data: RichPayload,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    Status {
        execution_state: ExecutionState,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
}

/// A running interpreter owned by exactly one execution session.
#[async_trait]
pub trait Interpreter: Send {
    /// Submit source for execution. Messages follow on the stream.
    async fn submit(&mut self, code: &str) -> Result<()>;

    /// Receive the next message. `None` means the stream ended without an
    /// idle signal (the process died or closed its channel).
    async fn next_message(&mut self) -> Result<Option<KernelMessage>>;

    /// Tear down channel and process. Must not fail; callers invoke this
    /// on every exit path.
    async fn shutdown(&mut self);
}

/// Creates a fresh interpreter per session.
#[async_trait]
pub trait InterpreterFactory: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn Interpreter>>;
}

/// Embedded driver that speaks `KernelMessage` as JSON lines over stdio.
///
/// It emits an idle status on boot (the ready signal), then serves one
/// execute request per stdin line: busy status, stream/rich/error
/// messages, idle status. Interactive input raises StdinNotImplemented,
/// matching the error the engine rewrites into its remediation message.
const PY_DRIVER: &str = r#"
import base64
import io
import json
import sys
import traceback


def _emit(message):
    sys.__stdout__.write(json.dumps(message) + "\n")
    sys.__stdout__.flush()


class _StreamWriter(io.TextIOBase):
    def write(self, text):
        if text:
            _emit({"msg_type": "stream", "text": text})
        return len(text)


class StdinNotImplemented(RuntimeError):
    pass


def _blocked_input(prompt=""):
    raise StdinNotImplemented(
        "raw_input was called, but this frontend does not support input requests."
    )


def _displayhook(value):
    if value is None:
        return
    _emit({"msg_type": "execute_result", "data": {"text/plain": repr(value)}})


def _flush_figures():
    if "matplotlib" not in sys.modules:
        return
    try:
        import matplotlib.pyplot as plt

        for num in plt.get_fignums():
            buf = io.BytesIO()
            plt.figure(num).savefig(buf, format="png")
            _emit({
                "msg_type": "display_data",
                "data": {"image/png": base64.b64encode(buf.getvalue()).decode("ascii")},
            })
        plt.close("all")
    except Exception:
        pass


_emit({"msg_type": "status", "execution_state": "idle"})

_scope = {"input": _blocked_input}

for _line in sys.stdin:
    if not _line.strip():
        continue
    try:
        _request = json.loads(_line)
    except ValueError:
        continue
    _emit({"msg_type": "status", "execution_state": "busy"})
    sys.stdout = _StreamWriter()
    sys.stderr = sys.stdout
    sys.displayhook = _displayhook
    try:
        exec(compile(_request["code"], "<session>", "exec"), _scope)
        _flush_figures()
    except BaseException:
        _etype, _evalue, _tb = sys.exc_info()
        _emit({
            "msg_type": "error",
            "ename": _etype.__name__,
            "evalue": str(_evalue),
            "traceback": traceback.format_exception(_etype, _evalue, _tb),
        })
    finally:
        sys.stdout = sys.__stdout__
        sys.stderr = sys.__stderr__
        sys.displayhook = sys.__displayhook__
    _emit({"msg_type": "status", "execution_state": "idle"})
"#;

/// Interpreter backed by a local Python subprocess running the embedded
/// driver. The child is spawned with kill_on_drop so a dropped session
/// can never leak a process.
pub struct SubprocessInterpreter {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl Interpreter for SubprocessInterpreter {
    async fn submit(&mut self, code: &str) -> Result<()> {
        let request =
            serde_json::to_string(&ExecuteRequest { code }).context("failed to encode request")?;
        self.stdin
            .write_all(request.as_bytes())
            .await
            .context("failed to write to interpreter")?;
        self.stdin
            .write_all(b"\n")
            .await
            .context("failed to write to interpreter")?;
        self.stdin
            .flush()
            .await
            .context("failed to flush interpreter channel")?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<KernelMessage>> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .context("failed to read interpreter message")?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let message: KernelMessage = serde_json::from_str(&line)
                        .context("malformed interpreter message")?;
                    return Ok(Some(message));
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        // Closing stdin ends the driver loop; the kill covers wedged code.
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "interpreter process already gone");
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), self.child.wait()).await;
    }
}

/// Spawns `SubprocessInterpreter`s from a configured Python command.
pub struct SubprocessFactory {
    python_command: String,
}

impl SubprocessFactory {
    pub fn new(python_command: impl Into<String>) -> Self {
        Self {
            python_command: python_command.into(),
        }
    }
}

#[async_trait]
impl InterpreterFactory for SubprocessFactory {
    async fn spawn(&self) -> Result<Box<dyn Interpreter>> {
        let mut child = Command::new(&self.python_command)
            .arg("-u")
            .arg("-c")
            .arg(PY_DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start interpreter '{}'", self.python_command))?;

        let stdin = child
            .stdin
            .take()
            .context("interpreter stdin unavailable")?;
        let stdout = child
            .stdout
            .take()
            .context("interpreter stdout unavailable")?;

        let mut interpreter = SubprocessInterpreter {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        // Await the ready signal before handing the session out.
        match interpreter.next_message().await? {
            Some(KernelMessage::Status {
                execution_state: ExecutionState::Idle,
            }) => Ok(Box::new(interpreter)),
            other => {
                interpreter.shutdown().await;
                bail!("interpreter did not signal ready: {:?}", other)
            }
        }
    }
}
