//! Execution contexts: the worker side of a generation job.
//!
//! An [`ExecutionContext`] owns one renderer and turns [`Command`]s into
//! [`Status`]es. [`spawn_context`] runs it on its own thread behind a pair of
//! channels and hands the coordinator a [`ContextHandle`].

use crate::{
    error::GenerateError,
    protocol::{Command, Status},
    render::{Renderer, RendererFactory},
};
use async_channel::{Receiver, Sender};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// How a context thread ended. `Err` carries a reason the coordinator can
/// surface as a worker failure.
pub type ContextOutcome = std::result::Result<(), String>;

pub type ContextTask = Box<dyn FnOnce() -> ContextOutcome + Send + 'static>;

/// Where execution contexts run.
pub trait ExecutionHost: Send + Sync {
    /// `Err` with a reason when this host cannot run background contexts.
    fn available(&self) -> std::result::Result<(), String>;

    fn spawn(&self, name: String, task: ContextTask) -> std::io::Result<JoinHandle<ContextOutcome>>;
}

/// Runs each context on a dedicated OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadHost;

impl ExecutionHost for ThreadHost {
    fn available(&self) -> std::result::Result<(), String> {
        if cfg!(all(target_family = "wasm", not(target_feature = "atomics"))) {
            return Err("threads are not available on this target".into());
        }
        Ok(())
    }

    fn spawn(&self, name: String, task: ContextTask) -> std::io::Result<JoinHandle<ContextOutcome>> {
        std::thread::Builder::new().name(name).spawn(task)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Accumulating { total_chunks: usize, applied: usize },
    Failed,
}

pub struct ExecutionContext {
    renderer: Box<dyn Renderer>,
    state: State,
}

impl ExecutionContext {
    pub fn new(renderer: Box<dyn Renderer>) -> Self {
        Self {
            renderer,
            state: State::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Applies one command. Returns the status to report, if any.
    ///
    /// Renderer errors and panics never escape; they become
    /// [`Status::Error`] and park the context until the next `Begin`.
    pub fn handle(&mut self, cmd: Command) -> Option<Status> {
        match (cmd, self.state.clone()) {
            (Command::Begin { .. }, State::Accumulating { .. }) => Some(Status::Error {
                message: "a job is already bound to this execution context".into(),
            }),
            (
                Command::Begin {
                    header,
                    footer,
                    total_chunks,
                },
                prev,
            ) => {
                let renderer = &mut self.renderer;
                let started = guarded(|| {
                    if prev == State::Failed {
                        renderer.reset()?;
                    }
                    renderer.start(&header, &footer)
                });
                match started {
                    Ok(()) => {
                        self.state = State::Accumulating {
                            total_chunks,
                            applied: 0,
                        };
                        None
                    }
                    Err(message) => self.fail(message),
                }
            }
            (
                Command::Chunk {
                    index,
                    rows,
                    header,
                    footer,
                },
                State::Accumulating {
                    total_chunks,
                    applied,
                },
            ) => {
                if index != applied {
                    return self.fail(format!(
                        "chunk {index} arrived out of order, expected {applied}"
                    ));
                }
                let renderer = &mut self.renderer;
                match guarded(|| renderer.append_table(&header, &rows, &footer)) {
                    Ok(()) => {
                        let applied = applied + 1;
                        self.state = State::Accumulating {
                            total_chunks,
                            applied,
                        };
                        debug!(chunk = index, rows = rows.len(), "chunk applied");
                        let progress = (total_chunks > 0)
                            .then(|| (applied as f32 / total_chunks as f32).min(1.0));
                        Some(Status::Processing { progress })
                    }
                    Err(message) => self.fail(format!("chunk {index}: {message}")),
                }
            }
            (Command::Done, State::Accumulating { .. }) => {
                let renderer = &mut self.renderer;
                match guarded(|| renderer.finalize()) {
                    Ok(artifact) => {
                        // Ready for another job; the finished document is gone.
                        let renderer = &mut self.renderer;
                        self.state = match guarded(|| renderer.reset()) {
                            Ok(()) => State::Idle,
                            Err(message) => {
                                warn!("renderer reset failed: {message}");
                                State::Failed
                            }
                        };
                        Some(Status::Completed { artifact })
                    }
                    Err(message) => self.fail(format!("finalize: {message}")),
                }
            }
            // The job already failed; the coordinator is tearing down.
            (_, State::Failed) => None,
            (cmd, State::Idle) => Some(Status::Error {
                message: format!("{} received before begin", cmd.kind()),
            }),
        }
    }

    fn fail(&mut self, message: String) -> Option<Status> {
        self.state = State::Failed;
        Some(Status::Error { message })
    }

    /// Processes commands until the coordinator hangs up.
    pub fn run(mut self, commands: Receiver<Command>, statuses: Sender<Status>) {
        while let Ok(cmd) = commands.recv_blocking() {
            if let Some(status) = self.handle(cmd) {
                if statuses.send_blocking(status).is_err() {
                    debug!("status receiver closed; context exiting");
                    break;
                }
            }
        }
    }
}

/// Runs a renderer call, turning errors and panics into a message.
pub(crate) fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> std::result::Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(format!("renderer panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Coordinator-side end of one execution context.
pub struct ContextHandle {
    name: String,
    commands: Sender<Command>,
    statuses: Receiver<Status>,
    join: Option<JoinHandle<ContextOutcome>>,
}

/// Starts a context on `host`. The renderer is built on the context's own
/// thread so document state never crosses threads.
pub fn spawn_context(
    host: &dyn ExecutionHost,
    factory: Arc<dyn RendererFactory>,
    name: String,
    queue_capacity: usize,
) -> Result<ContextHandle, GenerateError> {
    let (cmd_tx, cmd_rx) = async_channel::bounded::<Command>(queue_capacity.max(1));
    let (status_tx, status_rx) = async_channel::unbounded::<Status>();

    let thread_name = name.clone();
    let task: ContextTask = Box::new(move || {
        let renderer = factory.create().map_err(|e| {
            error!("[{thread_name}] renderer init failed: {e:#}");
            format!("renderer init failed: {e:#}")
        })?;
        ExecutionContext::new(renderer).run(cmd_rx, status_tx);
        Ok(())
    });

    let join = host
        .spawn(name.clone(), task)
        .map_err(|e| GenerateError::WorkerFailure(format!("spawning {name}: {e}")))?;
    debug!("[{name}] execution context started");

    Ok(ContextHandle {
        name,
        commands: cmd_tx,
        statuses: status_rx,
        join: Some(join),
    })
}

impl ContextHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, cmd: Command) -> Result<(), GenerateError> {
        let kind = cmd.kind();
        self.commands.send(cmd).await.map_err(|_| {
            GenerateError::WorkerFailure(format!("{}: channel closed while sending {kind}", self.name))
        })
    }

    /// Next status, or `None` once the context is gone.
    pub async fn recv(&self) -> Option<Status> {
        self.statuses.recv().await.ok()
    }

    /// Closes both channels and, with `wait`, joins the thread.
    ///
    /// Returns the failure reason if the thread ended abnormally. Without
    /// `wait` the thread is detached and exits after its current command.
    pub async fn teardown(mut self, wait: bool) -> Option<String> {
        self.commands.close();
        while let Ok(late) = self.statuses.try_recv() {
            warn!("[{}] ignoring {} status after teardown", self.name, status_kind(&late));
        }
        self.statuses.close();

        let join = self.join.take()?;
        if !wait {
            debug!("[{}] execution context detached", self.name);
            return None;
        }

        let name = self.name.clone();
        let joined = tokio::task::spawn_blocking(move || join.join()).await;
        let reason = match joined {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(payload)) => Some(format!(
                "context thread panicked: {}",
                panic_message(payload.as_ref())
            )),
            Err(e) => Some(format!("joining context thread: {e}")),
        };
        debug!("[{name}] execution context torn down");
        reason
    }
}

fn status_kind(s: &Status) -> &'static str {
    match s {
        Status::Processing { .. } => "processing",
        Status::Completed { .. } => "completed",
        Status::Error { .. } => "error",
    }
}
