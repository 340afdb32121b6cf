//! Re-encryption of a directory subtree.
//!
//! Every entry below a directory should be encrypted for the recipients of
//! the `.gpg-id` governing it. Moving entries around or editing a recipients
//! file breaks that; [`Store::reencrypt_path`] finds the drifted entries and
//! rewrites them.
//!
//! Unlike the other operations the pass runs sequentially with blocking
//! invocations. It does not go through the transaction tracker, except for
//! the final push.

use crate::commands::{gpg_decrypt, gpg_encrypt, gpg_list_recipients, DECRYPT_FAILED};
use crate::events::StoreEvent;
use crate::recipients::{self, ENTRY_SUFFIX, RECIPIENTS_FILE};
use crate::{PassError, Result, Store};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of a re-encryption pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReencryptReport {
    /// Entries whose recipients were checked.
    pub scanned: usize,
    /// Entries rewritten for their governing recipients.
    pub reencrypted: Vec<PathBuf>,
    /// Entries left as they were, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl ReencryptReport {
    /// True when no entry failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn fail(&mut self, file: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(file = %file.display(), %reason, "re-encryption skipped");
        self.failed.push((file.to_path_buf(), reason));
    }
}

/// Recipients of the directory currently being scanned.
struct Governing {
    dir: PathBuf,
    keys: Vec<String>,
    /// A missing recipients file has already been reported for `dir`.
    reported: bool,
}

impl Store {
    /// Re-encrypts every entry below `dir` whose recipients differ from the
    /// ones governing it.
    ///
    /// Waits for all previously queued invocations first. A failing entry
    /// is recorded in the report and the scan moves on; only an executor
    /// shutdown aborts the pass.
    pub async fn reencrypt_path(&self, dir: &Path) -> Result<ReencryptReport> {
        self.executor.barrier().await?;

        self.emit(StoreEvent::status(
            format!("Re-encrypting from folder {}", dir.display()),
            3000,
        ));
        self.emit(StoreEvent::ReencryptStarted);

        let result = self.reencrypt_tree(dir).await;
        self.emit(StoreEvent::ReencryptEnded);
        result
    }

    async fn reencrypt_tree(&self, dir: &Path) -> Result<ReencryptReport> {
        if self.config.auto_pull && self.config.git_enabled() {
            self.emit(StoreEvent::status("Updating password-store", 2000));
            if let Err(e) = self.git_pull_blocking().await {
                if matches!(e, PassError::ExecutorClosed) {
                    return Err(e);
                }
                warn!(error = %e, "git pull before re-encryption failed");
            }
        }

        let mut report = ReencryptReport::default();
        let mut governing: Option<Governing> = None;

        for file in encrypted_files(dir) {
            report.scanned += 1;

            let parent = file.parent().unwrap_or(dir).to_path_buf();
            let current = match governing.take() {
                Some(g) if g.dir == parent => governing.insert(g),
                _ => {
                    let mut keys = recipients::recipient_list(&self.config.store_path, &file);
                    keys.sort();
                    governing.insert(Governing {
                        dir: parent,
                        keys,
                        reported: false,
                    })
                }
            };

            match self.reencrypt_file(&file, current, &mut report).await {
                Ok(()) => {}
                Err(PassError::ExecutorClosed) => return Err(PassError::ExecutorClosed),
                Err(e) => report.fail(&file, e.to_string()),
            }
        }

        info!(
            dir = %dir.display(),
            scanned = report.scanned,
            reencrypted = report.reencrypted.len(),
            failed = report.failed.len(),
            "re-encryption finished"
        );

        if self.config.auto_push {
            self.emit(StoreEvent::status("Updating password-store", 2000));
            self.git_push();
        }

        Ok(report)
    }

    async fn reencrypt_file(
        &self,
        file: &Path,
        governing: &mut Governing,
        report: &mut ReencryptReport,
    ) -> Result<()> {
        let intended = governing.keys.as_slice();
        let listing = self
            .executor
            .execute_blocking(gpg_list_recipients(&self.config, file))
            .await?;
        let actual =
            recipients::parse_listed_keys(&format!("{}\n{}", listing.stdout, listing.stderr));

        if recipients::same_recipients(&actual, intended) {
            debug!(file = %file.display(), "recipients up to date");
            return Ok(());
        }

        if intended.is_empty() {
            if !governing.reported {
                governing.reported = true;
                self.critical(
                    "Can not edit",
                    "Could not read encryption key to use, .gpg-id file missing or invalid.",
                );
            }
            report.fail(file, "no recipients");
            return Ok(());
        }

        debug!(file = %file.display(), ?actual, ?intended, "recipients drifted");

        let decrypted = self
            .executor
            .execute_blocking(gpg_decrypt(&self.config, file))
            .await?;
        let decrypt_ok = decrypted.success();
        let mut plaintext = decrypted.stdout;
        if !decrypt_ok || plaintext.is_empty() || plaintext == DECRYPT_FAILED {
            report.fail(file, DECRYPT_FAILED);
            return Ok(());
        }
        if !plaintext.ends_with('\n') {
            plaintext.push('\n');
        }

        let encrypted = self
            .executor
            .execute_blocking(gpg_encrypt(&self.config, file, intended, true, &plaintext))
            .await?;
        if !encrypted.success() {
            report.fail(file, format!("encryption failed: {}", encrypted.stderr.trim()));
            return Ok(());
        }

        if self.config.git_enabled() {
            let message = format!("Edit for {} using QtPass.", self.config.entry_name(file));
            for invocation in [self.git().add(file), self.git().commit(&message, Some(file))] {
                let output = self.executor.execute_blocking(invocation).await?;
                if !output.success() {
                    warn!(
                        file = %file.display(),
                        exit_code = output.exit_code,
                        stderr = %output.stderr.trim(),
                        "git step failed after re-encryption"
                    );
                    break;
                }
            }
        }

        report.reencrypted.push(file.to_path_buf());
        Ok(())
    }
}

/// Lists the encrypted entries below `root`, depth first.
///
/// Within a directory, files come before sub-directories and both are taken
/// in name order. Hidden entries and the recipients file are skipped;
/// unreadable directories are logged and skipped.
fn encrypted_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory");
                continue;
            }
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == RECIPIENTS_FILE {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if name.ends_with(ENTRY_SUFFIX) {
                files.push(path);
            }
        }
        files.sort();
        dirs.sort();

        found.extend(files);
        stack.extend(dirs.into_iter().rev());
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_encrypted_files_order_and_filters() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b.gpg"));
        touch(&root.join("a.gpg"));
        touch(&root.join(".gpg-id"));
        touch(&root.join("notes.txt"));
        touch(&root.join(".git/objects/x.gpg"));
        touch(&root.join("team/z.gpg"));
        touch(&root.join("team/deep/y.gpg"));
        touch(&root.join("alpha/c.gpg"));

        let relative: Vec<_> = encrypted_files(root)
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            relative,
            vec!["a.gpg", "b.gpg", "alpha/c.gpg", "team/z.gpg", "team/deep/y.gpg"]
        );
    }

    #[test]
    fn test_encrypted_files_missing_root() {
        let dir = tempdir().unwrap();
        assert!(encrypted_files(&dir.path().join("absent")).is_empty());
    }
}

#[cfg(all(test, feature = "mock"))]
mod store_tests {
    use super::*;
    use crate::executor::mock::{CallLog, MockRunner};
    use crate::executor::{Invocation, ProcessOutput, Runner};
    use crate::{Config, StoreEvents};
    use async_trait::async_trait;
    use tempfile::tempdir;

    const KEY_A: &str = "AAAA1111AAAA1111";
    const KEY_B: &str = "BBBB2222BBBB2222";

    fn listing(key: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: format!("gpg: public key is {}\n", key),
        }
    }

    fn answer(inv: &Invocation, listed: &str, plaintext: &str) -> ProcessOutput {
        if inv.has_arg("--list-only") {
            listing(listed)
        } else if inv.has_arg("-d") {
            ProcessOutput::ok(plaintext)
        } else {
            ProcessOutput::ok("")
        }
    }

    fn store_with<F>(dir: &Path, handler: F) -> (Store, CallLog)
    where
        F: Fn(&Invocation) -> ProcessOutput + Send + Sync + 'static,
    {
        fs::write(dir.join(".gpg-id"), format!("{}\n", KEY_A)).unwrap();
        fs::write(dir.join("secret.gpg"), "ciphertext").unwrap();
        let runner = MockRunner::with_handler(handler);
        let calls = runner.calls();
        let (store, _events) = Store::with_runner(Config::new(dir), runner);
        (store, calls)
    }

    #[tokio::test]
    async fn test_matching_recipients_is_noop() {
        let dir = tempdir().unwrap();
        let (store, calls) = store_with(dir.path(), |inv| answer(inv, KEY_A, "pw\n"));

        let report = store.reencrypt_path(dir.path()).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert!(report.reencrypted.is_empty());
        assert!(report.is_clean());
        assert_eq!(calls.len(), 1);
        assert!(calls.snapshot()[0].has_arg("--list-only"));
    }

    #[tokio::test]
    async fn test_drifted_entry_is_rewritten_and_committed() {
        let dir = tempdir().unwrap();
        let (store, calls) = store_with(dir.path(), |inv| answer(inv, KEY_B, "pw"));

        let report = store.reencrypt_path(dir.path()).await.unwrap();
        assert_eq!(report.reencrypted, vec![dir.path().join("secret.gpg")]);

        let gpg = calls.args_of("gpg");
        assert_eq!(gpg.len(), 3);
        let encrypt = &gpg[2];
        assert!(encrypt.contains(&KEY_A.to_string()));
        assert!(!encrypt.contains(&KEY_B.to_string()));
        assert_eq!(calls.snapshot()[2].stdin.as_deref(), Some("pw\n"));

        let git = calls.args_of("git");
        assert_eq!(git[1][..3], ["commit", "-m", "Edit for secret using QtPass."]);
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_recorded_and_scan_continues() {
        let dir = tempdir().unwrap();
        let (store, calls) = store_with(dir.path(), |inv| answer(inv, KEY_B, ""));
        fs::write(dir.path().join("second.gpg"), "ciphertext").unwrap();

        let report = store.reencrypt_path(dir.path()).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].1, DECRYPT_FAILED);
        assert!(calls.args_of("git").is_empty());
    }

    /// Runner whose pull and decrypt of `a_binary.gpg` cannot be run at all.
    struct Unreliable;

    #[async_trait]
    impl Runner for Unreliable {
        async fn run(&self, inv: &Invocation) -> Result<ProcessOutput> {
            if inv.has_arg("pull") {
                return Err(PassError::ProgramNotFound("git".to_string()));
            }
            let binary = inv.args.last().map_or(false, |a| a.ends_with("a_binary.gpg"));
            if inv.has_arg("-d") && binary {
                return Err(PassError::CommandFailed("broken pipe".to_string()));
            }
            Ok(answer(inv, KEY_B, "pw\n"))
        }
    }

    fn unreliable_store(dir: &Path) -> (Store, StoreEvents) {
        fs::write(dir.join(".gpg-id"), format!("{}\n", KEY_A)).unwrap();
        fs::write(dir.join("a_binary.gpg"), "ciphertext").unwrap();
        fs::write(dir.join("b_fine.gpg"), "ciphertext").unwrap();
        Store::with_runner(Config::new(dir).with_auto_pull(true), Unreliable)
    }

    #[tokio::test]
    async fn test_runner_error_fails_only_that_entry() {
        let dir = tempdir().unwrap();
        let (store, mut events) = unreliable_store(dir.path());

        let report = store.reencrypt_path(dir.path()).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, dir.path().join("a_binary.gpg"));
        assert!(report.failed[0].1.contains("broken pipe"));
        assert_eq!(report.reencrypted, vec![dir.path().join("b_fine.gpg")]);
        assert_eq!(events.drain().last(), Some(&StoreEvent::ReencryptEnded));
    }

    #[tokio::test]
    async fn test_failed_auto_pull_does_not_stop_the_pass() {
        let dir = tempdir().unwrap();
        let (store, mut events) = unreliable_store(dir.path());
        fs::remove_file(dir.path().join("a_binary.gpg")).unwrap();

        let report = store.reencrypt_path(dir.path()).await.unwrap();

        assert_eq!(report.reencrypted, vec![dir.path().join("b_fine.gpg")]);
        let drained = events.drain();
        assert!(drained.contains(&StoreEvent::status("Updating password-store", 2000)));
        assert_eq!(drained.last(), Some(&StoreEvent::ReencryptEnded));
    }

    #[tokio::test]
    async fn test_missing_recipients_reported_once_per_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("one.gpg"), "ciphertext").unwrap();
        fs::write(dir.path().join("two.gpg"), "ciphertext").unwrap();
        let runner = MockRunner::with_handler(|inv| answer(inv, KEY_B, "pw\n"));
        let (store, mut events) = Store::with_runner(Config::new(dir.path()), runner);

        let report = store.reencrypt_path(dir.path()).await.unwrap();

        assert_eq!(report.failed.len(), 2);
        let critical = events
            .drain()
            .into_iter()
            .filter(|event| matches!(event, StoreEvent::Critical { .. }))
            .count();
        assert_eq!(critical, 1);
    }
}
