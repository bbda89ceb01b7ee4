/// Execution Engine - one submission, one disposable interpreter
///
/// **Core Responsibility:**
/// Run a submission in an isolated interpreter session and turn its
/// message stream into an ordered sequence of output records.
///
/// **Critical Properties:**
/// - `execute` never returns an error: every internal fault (spawn
///   failure, timeout, closed channel) becomes exactly one `error`
///   record so the caller always gets a record sequence
/// - Exactly one session per request; the interpreter is torn down on
///   every exit path, with teardown failures swallowed
/// - Stateless across sessions; callers bound total concurrency
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use codelab_common::types::{ErrorKind, ErrorRecord, ImageRef, OutputRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::interpreter::{
    ExecutionState, Interpreter, InterpreterFactory, KernelMessage, RichPayload,
};
use crate::metrics;

/// Bound on each wait for the next interpreter message. Reaching it
/// fails the session; there is no retry.
pub const MESSAGE_WAIT: Duration = Duration::from_secs(10);

/// Fixed remediation text for blocking interactive input, used both by
/// the static scan and for blocked-input errors raised at runtime.
pub const INPUT_REMEDIATION: &str = "input() cannot be used here: the sandbox has no \
interactive console. Assign the values your program needs directly in the code and run \
it again.";

/// `input(` at an identifier boundary. `x=input()` matches, `myinput()`
/// does not.
static INPUT_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_])input\s*\(").unwrap());

/// ANSI control sequences in interpreter tracebacks.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

/// Engine-internal faults. Converted to a single `error` record at the
/// boundary; to the caller each means "no idle signal within the bound",
/// so all surface under the communication-timeout kind without exposing
/// interpreter internals.
#[derive(Debug, thiserror::Error)]
enum SessionFault {
    #[error("no response from the interpreter within {0:?}; execution aborted")]
    MessageTimeout(Duration),
    #[error("the interpreter stopped before finishing the submission")]
    ChannelClosed,
    #[error("the interpreter session could not be serviced")]
    Session(#[source] anyhow::Error),
}

impl SessionFault {
    fn into_record(self) -> OutputRecord {
        OutputRecord::Error(ErrorRecord {
            kind: ErrorKind::CommunicationTimeout,
            message: self.to_string(),
        })
    }
}

/// Message-loop state. `AwaitingMessage` blocks on the bounded receive,
/// `Running` classifies one received message, `Idle` is terminal.
enum SessionState {
    AwaitingMessage,
    Running(KernelMessage),
    Idle,
}

pub struct ExecutionEngine {
    factory: Arc<dyn InterpreterFactory>,
    store: Arc<dyn ArtifactStore>,
}

impl ExecutionEngine {
    pub fn new(factory: Arc<dyn InterpreterFactory>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { factory, store }
    }

    /// Execute one submission and return its output records in emission
    /// order. `sandboxed` tags stored artifacts as temporary.
    pub async fn execute(&self, source: &str, sandboxed: bool) -> Vec<OutputRecord> {
        // Static ban: no interpreter is started for rejected constructs.
        if INPUT_CALL.is_match(source) {
            debug!("Submission rejected by static input() scan");
            return vec![OutputRecord::Error(ErrorRecord {
                kind: ErrorKind::RejectedConstruct,
                message: INPUT_REMEDIATION.to_string(),
            })];
        }

        let session_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(session_id = %session_id, source_size = source.len(), "Starting session");

        let mut interpreter = match self.factory.spawn().await {
            Ok(interpreter) => interpreter,
            Err(e) => {
                warn!(session_id = %session_id, error = %format!("{:#}", e), "Interpreter spawn failed");
                return vec![SessionFault::Session(e).into_record()];
            }
        };

        let records = self
            .run_session(interpreter.as_mut(), source, sandboxed)
            .await;

        // Teardown on every exit path; failures are swallowed inside
        // shutdown so one session's cleanup never blocks another's.
        interpreter.shutdown().await;

        info!(
            session_id = %session_id,
            records = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finished"
        );
        records
    }

    /// Grading path: `execute` plus a trailing `code_metrics` record.
    pub async fn execute_graded(&self, source: &str, sandboxed: bool) -> Vec<OutputRecord> {
        let mut records = self.execute(source, sandboxed).await;
        records.push(OutputRecord::CodeMetrics(metrics::analyze(source)));
        records
    }

    async fn run_session(
        &self,
        interpreter: &mut dyn Interpreter,
        source: &str,
        sandboxed: bool,
    ) -> Vec<OutputRecord> {
        let mut records = Vec::new();

        if let Err(e) = interpreter.submit(source).await {
            records.push(SessionFault::Session(e).into_record());
            return records;
        }

        let mut state = SessionState::AwaitingMessage;
        loop {
            state = match state {
                SessionState::AwaitingMessage => {
                    match tokio::time::timeout(MESSAGE_WAIT, interpreter.next_message()).await {
                        Err(_) => {
                            records.push(SessionFault::MessageTimeout(MESSAGE_WAIT).into_record());
                            break;
                        }
                        Ok(Err(e)) => {
                            records.push(SessionFault::Session(e).into_record());
                            break;
                        }
                        Ok(Ok(None)) => {
                            records.push(SessionFault::ChannelClosed.into_record());
                            break;
                        }
                        Ok(Ok(Some(message))) => SessionState::Running(message),
                    }
                }
                SessionState::Running(message) => {
                    match message {
                        KernelMessage::Status {
                            execution_state: ExecutionState::Idle,
                        } => SessionState::Idle,
                        other => {
                            self.classify_message(other, sandboxed, &mut records).await;
                            SessionState::AwaitingMessage
                        }
                    }
                }
                SessionState::Idle => break,
            };
        }

        records
    }

    async fn classify_message(
        &self,
        message: KernelMessage,
        sandboxed: bool,
        records: &mut Vec<OutputRecord>,
    ) {
        match message {
            KernelMessage::Stream { text } => {
                for line in text.lines() {
                    if !line.trim().is_empty() {
                        records.push(OutputRecord::Text(line.to_string()));
                    }
                }
            }
            KernelMessage::DisplayData { data } | KernelMessage::ExecuteResult { data } => {
                self.classify_rich_output(data, sandboxed, records).await;
            }
            KernelMessage::Error {
                ename,
                evalue,
                traceback,
            } => {
                if is_blocked_input(&ename, &evalue) {
                    records.push(OutputRecord::Error(ErrorRecord {
                        kind: ErrorKind::RejectedConstruct,
                        message: INPUT_REMEDIATION.to_string(),
                    }));
                } else {
                    records.push(OutputRecord::Error(ErrorRecord {
                        kind: ErrorKind::RuntimeFault,
                        message: clean_traceback(&traceback, &ename, &evalue),
                    }));
                }
            }
            // Busy transitions carry no output; idle is handled by the
            // state machine before classification.
            KernelMessage::Status { .. } => {}
        }
    }

    async fn classify_rich_output(
        &self,
        data: RichPayload,
        sandboxed: bool,
        records: &mut Vec<OutputRecord>,
    ) {
        if let Some(encoded) = data.image_png {
            match general_purpose::STANDARD.decode(encoded.trim()) {
                Ok(bytes) => {
                    let name = format!("visual_{}.png", Uuid::new_v4().simple());
                    match self.store.store(&bytes, &name).await {
                        Ok(reference) => records.push(OutputRecord::Image(ImageRef {
                            reference,
                            temporary: sandboxed,
                        })),
                        Err(e) => {
                            warn!(error = %format!("{:#}", e), "Failed to store visualization");
                            records.push(OutputRecord::Error(ErrorRecord {
                                kind: ErrorKind::RuntimeFault,
                                message: "a visualization was produced but could not be stored"
                                    .to_string(),
                            }));
                        }
                    }
                }
                Err(e) => records.push(OutputRecord::Error(ErrorRecord {
                    kind: ErrorKind::RuntimeFault,
                    message: format!("invalid image payload from the interpreter: {}", e),
                })),
            }
        } else if let Some(text) = data.text_plain {
            if !text.trim().is_empty() {
                records.push(OutputRecord::Text(text));
            }
        }
    }
}

/// Runtime analogue of the static ban: the driver raises
/// StdinNotImplemented when submitted code still reaches `input()`
/// (through exec, eval, aliasing).
fn is_blocked_input(ename: &str, evalue: &str) -> bool {
    ename == "StdinNotImplemented" || evalue.contains("does not support input requests")
}

/// Strip control sequences and blank lines from a traceback; fall back
/// to `ename: evalue` when nothing printable remains.
fn clean_traceback(traceback: &[String], ename: &str, evalue: &str) -> String {
    let lines: Vec<String> = traceback
        .iter()
        .flat_map(|frame| frame.lines())
        .map(|line| ANSI_ESCAPE.replace_all(line, "").into_owned())
        .filter(|line| !line.trim().is_empty())
        .collect();

    if lines.is_empty() {
        format!("{}: {}", ename, evalue)
    } else {
        lines.join("\n")
    }
}
