//! The password store.
//!
//! A [`Store`] turns logical operations (show, insert, remove, init, move,
//! copy) into sequences of git and crypto invocations. Each operation runs
//! inside a scoped transaction; callers only ever see the consolidated
//! [`StoreEvent::Finished`] for it, never the individual subprocesses.
//!
//! # Example
//!
//! ```no_run
//! use passmux::{Config, Store};
//!
//! #[tokio::main]
//! async fn main() -> passmux::Result<()> {
//!     let (store, mut events) = Store::new(Config::from_env());
//!     store.preflight().await?;
//!
//!     store.insert("web/mail", "hunter2\n", false)?;
//!     let inserted = events.next_finished().await;
//!     println!("insert finished: {:?}", inserted);
//!
//!     store.show("web/mail")?;
//!     if let Some(shown) = events.next_finished().await {
//!         println!("{}", shown.stdout);
//!     }
//!     Ok(())
//! }
//! ```

mod fs;
mod ops;

use crate::commands::Git;
use crate::events::{EventSender, StoreEvent, StoreEvents};
use crate::executor::{check_command_exists, Executor, Invocation, Report, Runner, SystemRunner};
use crate::transaction::{TransactionId, TransactionKind, TransactionTracker};
use crate::{Config, PassError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a password store.
///
/// Must be created from within a tokio runtime: construction spawns the
/// executor worker and the completion dispatcher.
///
/// High-level operations are expected to be serialized by the caller; the
/// git working tree is a single shared resource.
pub struct Store {
    pub(crate) config: Config,
    pub(crate) executor: Arc<Executor>,
    tracker: Arc<Mutex<TransactionTracker>>,
    pub(crate) events: EventSender,
    dispatcher: JoinHandle<()>,
}

impl Store {
    /// Creates a store driving real processes.
    pub fn new(config: Config) -> (Self, StoreEvents) {
        Self::with_runner(config, SystemRunner)
    }

    /// Creates a store on top of a custom [`Runner`].
    pub fn with_runner(config: Config, runner: impl Runner) -> (Self, StoreEvents) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let executor = Arc::new(Executor::start(runner, completions_tx));
        let tracker = Arc::new(Mutex::new(TransactionTracker::new()));

        let dispatcher = tokio::spawn(dispatch(
            completions_rx,
            Arc::clone(&tracker),
            Arc::clone(&executor),
            events_tx.clone(),
        ));

        let store = Self {
            config,
            executor,
            tracker,
            events: events_tx,
            dispatcher,
        };
        (store, StoreEvents::new(events_rx))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks that the configured tools are installed and the store exists.
    pub async fn preflight(&self) -> Result<()> {
        let crypto = self.config.crypto_executable();
        if !check_command_exists(crypto).await? {
            return Err(PassError::ProgramNotFound(crypto.to_string()));
        }

        if crypto != self.config.gpg_executable
            && !check_command_exists(&self.config.gpg_executable).await?
        {
            return Err(PassError::ProgramNotFound(self.config.gpg_executable.clone()));
        }

        if self.config.git_enabled() && !check_command_exists(&self.config.git_executable).await? {
            return Err(PassError::ProgramNotFound(self.config.git_executable.clone()));
        }

        if !self.config.store_path.is_dir() {
            return Err(PassError::Other(anyhow::anyhow!(
                "password store not initialized at {}",
                self.config.store_path.display()
            )));
        }

        Ok(())
    }

    /// Opens a scoped transaction of `kind`.
    ///
    /// The tracker stays locked for the lifetime of the scope so that
    /// completions are never correlated against a half-issued transaction.
    /// The scope must not be held across an `.await`.
    pub(crate) fn transaction(&self, kind: TransactionKind) -> ScopedTransaction<'_> {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let id = tracker.begin(kind);
        ScopedTransaction {
            tracker,
            executor: &self.executor,
            events: &self.events,
            id,
            local_failure: None,
        }
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    pub(crate) fn critical(&self, title: &str, description: &str) {
        info!(title, "critical store event");
        self.emit(StoreEvent::critical(title, description));
    }

    pub(crate) fn git(&self) -> Git<'_> {
        Git::new(&self.config)
    }

    /// `git init` of the store root.
    pub fn git_init(&self) {
        let mut txn = self.transaction(TransactionKind::GitInit);
        txn.submit(self.git().init());
    }

    /// `git pull`, reported through the event stream.
    pub fn git_pull(&self) {
        let mut txn = self.transaction(TransactionKind::GitPull);
        txn.submit(self.git().pull());
    }

    /// `git pull`, waiting for it to finish. Failures are logged only.
    pub async fn git_pull_blocking(&self) -> Result<()> {
        let output = self.executor.execute_blocking(self.git().pull()).await?;
        if !output.success() {
            info!(exit_code = output.exit_code, stderr = %output.stderr.trim(), "git pull failed");
        }
        Ok(())
    }

    /// `git push` when git is enabled.
    pub fn git_push(&self) {
        if self.config.use_git {
            let mut txn = self.transaction(TransactionKind::GitPush);
            txn.submit(self.git().push());
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Scope of one logical operation.
///
/// Ending the scope (dropping it) closes the transaction, so the kind is
/// registered and a completion is reported even when the operation returns
/// early through an error path.
pub(crate) struct ScopedTransaction<'a> {
    tracker: MutexGuard<'a, TransactionTracker>,
    executor: &'a Executor,
    events: &'a EventSender,
    id: TransactionId,
    local_failure: Option<String>,
}

impl ScopedTransaction<'_> {
    /// Issues `invocation` as part of this transaction.
    pub(crate) fn submit(&mut self, invocation: Invocation) {
        let id = self.tracker.allocate();
        self.tracker.track(id);
        self.executor.submit(id, invocation);
    }

    /// Records a failure that did not come from a subprocess.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.local_failure.get_or_insert_with(|| reason.into());
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if let Some(finished) = self.tracker.end(self.id, self.local_failure.take()) {
            let _ = self.events.send(StoreEvent::Finished(finished));
        }
    }
}

async fn dispatch(
    mut completions: mpsc::UnboundedReceiver<Report>,
    tracker: Arc<Mutex<TransactionTracker>>,
    executor: Arc<Executor>,
    events: EventSender,
) {
    while let Some(report) = completions.recv().await {
        let resolution = tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_invocation_finished(&report.completion);

        for id in resolution.cancelled {
            executor.cancel(id);
        }
        report.acknowledge();

        if let Some(finished) = resolution.finished {
            if events.send(StoreEvent::Finished(finished)).is_err() {
                debug!("event receiver dropped");
            }
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::executor::mock::MockRunner;
    use crate::executor::ProcessOutput;
    use std::time::Duration;

    async fn next_finished(events: &mut StoreEvents) -> crate::FinishedTransaction {
        tokio::time::timeout(Duration::from_secs(5), events.next_finished())
            .await
            .expect("timed out waiting for transaction")
            .expect("event stream closed")
    }

    #[tokio::test]
    async fn test_git_pull_reports_output() {
        let runner = MockRunner::with_handler(|_| ProcessOutput::ok("Already up to date.\n"));
        let (store, mut events) = Store::with_runner(Config::new("/store"), runner);

        store.git_pull();

        let finished = next_finished(&mut events).await;
        assert_eq!(finished.kind, TransactionKind::GitPull);
        assert_eq!(finished.stdout, "Already up to date.\n");
    }

    #[tokio::test]
    async fn test_git_push_skipped_without_git() {
        let runner = MockRunner::new();
        let calls = runner.calls();
        let (store, mut events) = Store::with_runner(Config::new("/store").with_git(false), runner);

        store.git_push();
        store.executor.barrier().await.unwrap();

        assert!(calls.is_empty());
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn test_git_init_targets_store() {
        let runner = MockRunner::new();
        let calls = runner.calls();
        let (store, mut events) = Store::with_runner(Config::new("/store"), runner);

        store.git_init();

        assert_eq!(next_finished(&mut events).await.kind, TransactionKind::GitInit);
        assert_eq!(calls.args_of("git"), vec![vec!["init", "/store"]]);
    }

    #[tokio::test]
    async fn test_failed_step_cancels_rest_of_transaction() {
        let runner = MockRunner::with_handler(|inv| {
            if inv.has_arg("add") {
                ProcessOutput::failed(128, "fatal: pathspec did not match")
            } else {
                ProcessOutput::ok("")
            }
        });
        let calls = runner.calls();
        let (store, mut events) = Store::with_runner(Config::new("/store"), runner);

        {
            let mut txn = store.transaction(TransactionKind::GitAdd);
            txn.submit(store.git().add(std::path::Path::new("x.gpg")));
            txn.submit(store.git().commit("msg", None));
        }

        let finished = next_finished(&mut events).await;
        assert_eq!(finished.exit_code, 128);
        assert!(finished.stderr.contains("pathspec"));

        store.executor.barrier().await.unwrap();
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn test_preflight_reports_missing_tools() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).with_gpg_executable("nonexistent-gpg-12345");
        let (store, _events) = Store::with_runner(config, MockRunner::new());

        let err = store.preflight().await.unwrap_err();
        assert!(matches!(err, PassError::ProgramNotFound(p) if p == "nonexistent-gpg-12345"));
    }
}
