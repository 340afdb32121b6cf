//! Scripted runner for testing.
//!
//! [`MockRunner`] never spawns a process. It records every invocation it is
//! asked to run and answers from a handler closure, so tests can emulate
//! gpg and git and then assert on the exact command lines issued.

use super::{Invocation, ProcessOutput, Runner};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

type Handler = dyn Fn(&Invocation) -> ProcessOutput + Send + Sync;

/// Shared log of invocations run by a [`MockRunner`].
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Invocation>>>);

impl CallLog {
    fn push(&self, invocation: Invocation) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }

    /// Copy of every invocation recorded so far, in execution order.
    pub fn snapshot(&self) -> Vec<Invocation> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded argument lists of invocations of `program`.
    pub fn args_of(&self, program: &str) -> Vec<Vec<String>> {
        self.snapshot()
            .into_iter()
            .filter(|inv| inv.program == program)
            .map(|inv| inv.args)
            .collect()
    }
}

/// Runner answering every invocation from a handler.
///
/// # Example
///
/// ```
/// use passmux::executor::mock::MockRunner;
/// use passmux::executor::{Invocation, ProcessOutput, Runner};
///
/// #[tokio::main]
/// async fn main() -> passmux::Result<()> {
///     let runner = MockRunner::with_handler(|inv| {
///         if inv.has_arg("push") {
///             ProcessOutput::failed(1, "rejected")
///         } else {
///             ProcessOutput::ok("")
///         }
///     });
///     let calls = runner.calls();
///
///     let output = runner.run(&Invocation::new("git", ["push"])).await?;
///     assert_eq!(output.exit_code, 1);
///     assert_eq!(calls.len(), 1);
///     Ok(())
/// }
/// ```
pub struct MockRunner {
    calls: CallLog,
    handler: Box<Handler>,
}

impl MockRunner {
    /// Creates a runner where every invocation succeeds with empty output.
    pub fn new() -> Self {
        Self::with_handler(|_| ProcessOutput::ok(""))
    }

    /// Creates a runner answering with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> ProcessOutput + Send + Sync + 'static,
    {
        Self {
            calls: CallLog::default(),
            handler: Box::new(handler),
        }
    }

    /// Handle to the invocation log; stays valid after the runner is moved
    /// into an executor.
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        self.calls.push(invocation.clone());
        Ok((self.handler)(invocation))
    }
}
