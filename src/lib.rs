//! Passmux - a transactional, `pass`-compatible password store.
//!
//! Passmux drives `gpg` (or `keybase pgp`) and `git` as asynchronous
//! subprocesses and groups the invocations of each logical operation into a
//! transaction. Callers issue an operation and get exactly one consolidated
//! completion for it, however many processes it took.
//!
//! # Features
//!
//! - **Transactions**: insert, remove, move and friends each report a single
//!   [`FinishedTransaction`] with the aggregated exit code and output
//! - **Failure propagation**: a failing step cancels the queued steps after it
//! - **Re-encryption**: entries whose recipients drifted from their `.gpg-id`
//!   are rewritten and committed
//! - **Async/Await**: built on tokio; processes never block the runtime
//! - **Testable**: the `mock` feature ships a scripted [`Runner`](executor::Runner)
//!
//! # Quick Start
//!
//! ```no_run
//! use passmux::{Config, Store, UserInfo};
//!
//! #[tokio::main]
//! async fn main() -> passmux::Result<()> {
//!     let (store, mut events) = Store::new(Config::from_env().with_auto_push(true));
//!
//!     // Hand the team directory to two keys and re-encrypt what is there.
//!     let users = [
//!         UserInfo::new("0123456789ABCDEF", true, true),
//!         UserInfo::new("FEDCBA9876543210", true, false),
//!     ];
//!     let report = store.init("team", &users).await?;
//!     println!("re-encrypted {} entries", report.reencrypted.len());
//!
//!     store.insert("team/db", "s3cret\n", false)?;
//!     let finished = events.next_finished().await;
//!     println!("{:?}", finished);
//!     Ok(())
//! }
//! ```
//!
//! # Events
//!
//! Besides completions a store raises critical errors (missing recipients,
//! unwritable `.gpg-id`, no usable secret key), status messages and
//! re-encryption boundaries. See [`StoreEvent`].

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod recipients;
pub mod reencrypt;
pub mod store;
pub mod transaction;
pub mod validation;

pub use config::{Config, CryptoTool};
pub use error::{PassError, Result};
pub use events::{StoreEvent, StoreEvents};
pub use recipients::UserInfo;
pub use reencrypt::ReencryptReport;
pub use store::Store;
pub use transaction::{FinishedTransaction, TransactionKind};
