//! Transaction tracking.
//!
//! A transaction is one logical store operation together with the
//! subprocess invocations it issued. The [`TransactionTracker`] correlates
//! asynchronous completions back to their transaction and reports a single
//! [`FinishedTransaction`] once every invocation of a closed transaction has
//! completed, regardless of the order completions arrive in.

use crate::executor::{Completion, InvocationId};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// Kind of logical operation a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    GitInit,
    GitPull,
    GitPush,
    GitAdd,
    GitCommit,
    GitRm,
    GitMove,
    GitCopy,
    Show,
    Insert,
    Remove,
    Init,
    Move,
    Copy,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GitInit => "git-init",
            Self::GitPull => "git-pull",
            Self::GitPush => "git-push",
            Self::GitAdd => "git-add",
            Self::GitCommit => "git-commit",
            Self::GitRm => "git-rm",
            Self::GitMove => "git-move",
            Self::GitCopy => "git-copy",
            Self::Show => "show",
            Self::Insert => "insert",
            Self::Remove => "remove",
            Self::Init => "init",
            Self::Move => "move",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// Handle to a begun transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u64);

/// Consolidated outcome of a transaction, shaped like the output of a single
/// command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTransaction {
    pub kind: TransactionKind,
    /// First non-zero exit code seen, else 0.
    pub exit_code: i32,
    /// stdout of every invocation, in completion order.
    pub stdout: String,
    /// stderr of the completion that finished the transaction.
    pub stderr: String,
}

impl FinishedTransaction {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// What the caller must do after feeding a completion to the tracker.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Transaction that is now over, if any.
    pub finished: Option<FinishedTransaction>,
    /// Queued invocations that must no longer run.
    pub cancelled: Vec<InvocationId>,
}

#[derive(Debug)]
struct Transaction {
    kind: TransactionKind,
    pending: VecDeque<InvocationId>,
    stdout: String,
    stderr: String,
    exit_code: i32,
    closed: bool,
}

impl Transaction {
    fn record(&mut self, exit_code: i32, stdout: &str, stderr: &str) {
        self.stdout.push_str(stdout);
        self.stderr = stderr.to_string();
        if self.exit_code == 0 {
            self.exit_code = exit_code;
        }
    }

    fn is_over(&self) -> bool {
        self.closed && self.pending.is_empty()
    }

    fn into_finished(self) -> FinishedTransaction {
        FinishedTransaction {
            kind: self.kind,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Correlates invocation completions with logical operations.
///
/// The tracker never fails: unmatched completions are either attributed to
/// the oldest pending invocation (when they report failure) or dropped with
/// a diagnostic.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    next_transaction: u64,
    next_invocation: u64,
    open: Vec<TransactionId>,
    transactions: HashMap<TransactionId, Transaction>,
    owners: HashMap<InvocationId, TransactionId>,
    issued: VecDeque<InvocationId>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new logical operation. Invocations tracked from now on
    /// belong to it until it is ended.
    pub fn begin(&mut self, kind: TransactionKind) -> TransactionId {
        let id = TransactionId(self.next_transaction);
        self.next_transaction += 1;

        trace!(%kind, "transaction started");
        self.transactions.insert(
            id,
            Transaction {
                kind,
                pending: VecDeque::new(),
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                closed: false,
            },
        );
        self.open.push(id);
        id
    }

    /// Allocates a fresh invocation id.
    pub fn allocate(&mut self) -> InvocationId {
        let id = InvocationId(self.next_invocation);
        self.next_invocation += 1;
        id
    }

    /// Associates `invocation` with the most recently begun, still open
    /// transaction. Returns false when no transaction is open.
    pub fn track(&mut self, invocation: InvocationId) -> bool {
        let Some(&owner) = self.open.last() else {
            warn!(%invocation, "invocation issued outside of a transaction");
            return false;
        };
        let Some(transaction) = self.transactions.get_mut(&owner) else {
            return false;
        };

        transaction.pending.push_back(invocation);
        self.owners.insert(invocation, owner);
        self.issued.push_back(invocation);
        true
    }

    /// Closes the transaction's scope.
    ///
    /// `local_failure` records a failure that happened without a
    /// subprocess (an early configuration error or a filesystem fallback).
    /// Returns the finished transaction if nothing is pending anymore.
    pub fn end(
        &mut self,
        id: TransactionId,
        local_failure: Option<String>,
    ) -> Option<FinishedTransaction> {
        self.open.retain(|open| *open != id);

        let transaction = self.transactions.get_mut(&id)?;
        transaction.closed = true;
        if let Some(reason) = local_failure {
            transaction.record(1, "", &reason);
        }

        if transaction.is_over() {
            trace!(kind = %transaction.kind, "transaction over at scope end");
            self.transactions.remove(&id).map(Transaction::into_finished)
        } else {
            None
        }
    }

    /// Number of invocations still awaiting completion.
    pub fn pending(&self) -> usize {
        self.owners.len()
    }

    /// Feeds one completion into the tracker.
    pub fn on_invocation_finished(&mut self, completion: &Completion) -> Resolution {
        let Completion { id, output } = completion;
        let mut resolution = Resolution::default();

        match self.settle(*id) {
            Some(owner) => {
                if let Some(transaction) = self.transactions.get_mut(&owner) {
                    transaction.record(output.exit_code, &output.stdout, &output.stderr);

                    // A failed step aborts the remaining steps of its operation.
                    if !output.success() {
                        while let Some(next) = transaction.pending.pop_front() {
                            self.owners.remove(&next);
                            self.issued.retain(|issued| *issued != next);
                            resolution.cancelled.push(next);
                        }
                    }
                }
                resolution.finished = self.take_if_over(owner);
            }
            None if output.success() => {
                debug!(invocation = %id, "completion without a transaction ignored");
            }
            None => {
                // An upstream failure can abort downstream stages before they
                // are observed; attribute it to the oldest pending invocation.
                while resolution.finished.is_none() {
                    let Some(next) = self.issued.front().copied() else {
                        warn!(invocation = %id, exit_code = output.exit_code, "no such transaction");
                        break;
                    };
                    resolution.cancelled.push(next);

                    let Some(owner) = self.settle(next) else {
                        continue;
                    };
                    if let Some(transaction) = self.transactions.get_mut(&owner) {
                        transaction.record(output.exit_code, &output.stdout, &output.stderr);
                    }
                    resolution.finished = self.take_if_over(owner);
                }
            }
        }

        if let Some(finished) = &resolution.finished {
            debug!(kind = %finished.kind, exit_code = finished.exit_code, "transaction finished");
        }
        resolution
    }

    /// Removes `invocation` from the pending structures and returns its
    /// owning transaction.
    fn settle(&mut self, invocation: InvocationId) -> Option<TransactionId> {
        self.issued.retain(|issued| *issued != invocation);
        let owner = self.owners.remove(&invocation)?;
        if let Some(transaction) = self.transactions.get_mut(&owner) {
            transaction.pending.retain(|pending| *pending != invocation);
        }
        Some(owner)
    }

    fn take_if_over(&mut self, id: TransactionId) -> Option<FinishedTransaction> {
        if self.transactions.get(&id)?.is_over() {
            self.transactions.remove(&id).map(Transaction::into_finished)
        } else {
            None
        }
    }
}
