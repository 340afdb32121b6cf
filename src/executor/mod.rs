//! Subprocess execution.
//!
//! Every invocation a store issues goes through a single FIFO worker, so
//! invocations run in the order they were issued. Asynchronous submissions
//! report their completion on a channel keyed by [`InvocationId`]; blocking
//! executions are queued the same way and awaited by the caller.
//!
//! The actual process spawning is behind the [`Runner`] trait:
//! [`SystemRunner`] uses `tokio::process`, and the `mock` feature provides a
//! scripted runner for tests.

#[cfg(feature = "mock")]
pub mod mock;
mod system;

pub use system::{check_command_exists, SystemRunner};

use crate::{PassError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Identifier correlating an asynchronous completion with its invocation.
///
/// Ids are allocated by the transaction tracker and unique for the lifetime
/// of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(pub u64);

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A program to run with its arguments, working directory and stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Returns true if `arg` is one of the arguments.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with `exit_code` and `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Completion of an asynchronously submitted invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: InvocationId,
    pub output: ProcessOutput,
}

/// A completion as delivered by the worker.
///
/// The worker does not start the next queued invocation until the report is
/// acknowledged (or dropped), so the receiver can cancel downstream steps
/// of a failed pipeline before they run.
#[derive(Debug)]
pub struct Report {
    pub completion: Completion,
    ack: oneshot::Sender<()>,
}

impl Report {
    /// Lets the worker continue with the next queued invocation.
    pub fn acknowledge(self) {
        let _ = self.ack.send(());
    }
}

/// Runs a single invocation to completion.
///
/// Non-zero exit codes are not errors; they are reported in
/// [`ProcessOutput::exit_code`]. Errors mean the process could not be run
/// at all.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

enum Job {
    Submitted {
        id: InvocationId,
        invocation: Invocation,
    },
    Blocking {
        invocation: Invocation,
        reply: oneshot::Sender<Result<ProcessOutput>>,
    },
    Barrier(oneshot::Sender<()>),
}

/// FIFO executor backed by one worker task.
///
/// Must be created from within a tokio runtime.
pub struct Executor {
    jobs: mpsc::UnboundedSender<Job>,
    cancelled: Arc<Mutex<HashSet<InvocationId>>>,
}

impl Executor {
    /// Starts the worker. Completions of submitted invocations are reported
    /// on `completions`.
    pub fn start(runner: impl Runner, completions: mpsc::UnboundedSender<Report>) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));

        tokio::spawn(worker(
            Arc::new(runner),
            queue,
            completions,
            Arc::clone(&cancelled),
        ));

        Self { jobs, cancelled }
    }

    /// Queues `invocation`; its completion is reported later under `id`.
    pub fn submit(&self, id: InvocationId, invocation: Invocation) {
        debug!(%id, command = %invocation, "queueing invocation");
        if self.jobs.send(Job::Submitted { id, invocation }).is_err() {
            debug!(%id, "executor closed, invocation dropped");
        }
    }

    /// Marks a queued invocation so the worker skips it.
    ///
    /// Has no effect on an invocation that already started.
    pub fn cancel(&self, id: InvocationId) {
        trace!(%id, "cancelling invocation");
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    /// Runs `invocation` after everything queued before it and waits for
    /// its output.
    pub async fn execute_blocking(&self, invocation: Invocation) -> Result<ProcessOutput> {
        debug!(command = %invocation, "executing blocking invocation");
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job::Blocking { invocation, reply })
            .map_err(|_| PassError::ExecutorClosed)?;
        response.await.map_err(|_| PassError::ExecutorClosed)?
    }

    /// Waits until every invocation queued so far has finished.
    pub async fn barrier(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.jobs
            .send(Job::Barrier(done))
            .map_err(|_| PassError::ExecutorClosed)?;
        wait.await.map_err(|_| PassError::ExecutorClosed)
    }
}

async fn worker(
    runner: Arc<dyn Runner>,
    mut queue: mpsc::UnboundedReceiver<Job>,
    completions: mpsc::UnboundedSender<Report>,
    cancelled: Arc<Mutex<HashSet<InvocationId>>>,
) {
    while let Some(job) = queue.recv().await {
        match job {
            Job::Submitted { id, invocation } => {
                let skip = cancelled
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                if skip {
                    debug!(%id, "skipping cancelled invocation");
                    continue;
                }

                let output = match runner.run(&invocation).await {
                    Ok(output) => output,
                    Err(e) => ProcessOutput::failed(-1, e.to_string()),
                };
                trace!(%id, exit_code = output.exit_code, "invocation finished");

                let (ack, acknowledged) = oneshot::channel();
                let report = Report {
                    completion: Completion { id, output },
                    ack,
                };
                if completions.send(report).is_err() {
                    debug!(%id, "completion receiver dropped");
                    continue;
                }
                let _ = acknowledged.await;
            }
            Job::Blocking { invocation, reply } => {
                let result = runner.run(&invocation).await;
                let _ = reply.send(result);
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
