//! Logical store operations.

use super::fs as store_fs;
use super::Store;
use crate::commands::Crypto;
use crate::recipients::{self, UserInfo, ENTRY_SUFFIX, RECIPIENTS_FILE};
use crate::reencrypt::ReencryptReport;
use crate::transaction::TransactionKind;
use crate::validation::validate_entry_name;
use crate::{PassError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CANNOT_EDIT: &str = "Can not edit";
const NO_RECIPIENTS: &str =
    "Could not read encryption key to use, .gpg-id file missing or invalid.";

impl Store {
    fn entry_path(&self, name: &str) -> PathBuf {
        self.config.store_path.join(format!("{}{}", name, ENTRY_SUFFIX))
    }

    /// Decrypts entry `name`. The plaintext is delivered as the stdout of
    /// the consolidated [`TransactionKind::Show`] completion.
    pub fn show(&self, name: &str) -> Result<()> {
        let mut txn = self.transaction(TransactionKind::Show);
        if let Err(e) = validate_entry_name(name) {
            txn.fail(e.to_string());
            return Err(e);
        }
        let file = self.entry_path(name);

        txn.submit(Crypto::new(&self.config).decrypt(&file));
        Ok(())
    }

    /// Encrypts `value` into entry `name` for the recipients governing it,
    /// then stages and commits it when git is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`PassError::NoRecipients`] (and raises a critical event)
    /// without spawning anything when no recipients can be resolved.
    pub fn insert(&self, name: &str, value: &str, overwrite: bool) -> Result<()> {
        let mut txn = self.transaction(TransactionKind::Insert);
        if let Err(e) = validate_entry_name(name) {
            txn.fail(e.to_string());
            return Err(e);
        }
        let file = self.entry_path(name);

        let recipients = recipients::recipient_list(&self.config.store_path, &file);
        if recipients.is_empty() {
            self.critical(CANNOT_EDIT, NO_RECIPIENTS);
            txn.fail(NO_RECIPIENTS);
            return Err(PassError::NoRecipients(recipients::recipients_path(
                &self.config.store_path,
                &file,
            )));
        }

        if let Some(parent) = file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                txn.fail(e.to_string());
                return Err(e.into());
            }
        }

        debug!(entry = name, recipients = recipients.len(), overwrite, "inserting entry");
        txn.submit(Crypto::new(&self.config).encrypt(&file, &recipients, overwrite, value));

        if self.config.git_enabled() {
            if !overwrite {
                txn.submit(self.git().add(&file));
            }
            let verb = if overwrite { "Edit" } else { "Add" };
            let message = format!("{} for {} using QtPass.", verb, name);
            txn.submit(self.git().commit(&message, Some(&file)));
        }

        Ok(())
    }

    /// Removes entry `name`, or the directory `name` when `is_dir` is set.
    ///
    /// With git the removal is `git rm` plus a commit. Without git the
    /// files are deleted directly; a failure part way through a directory
    /// leaves already removed entries removed.
    pub fn remove(&self, name: &str, is_dir: bool) -> Result<()> {
        let mut txn = self.transaction(TransactionKind::Remove);
        if let Err(e) = validate_entry_name(name) {
            txn.fail(e.to_string());
            return Err(e);
        }
        let path = if is_dir {
            self.config.store_path.join(name)
        } else {
            self.entry_path(name)
        };

        if self.config.git_enabled() {
            txn.submit(self.git().rm(&path, is_dir));
            let message = format!("Remove for {} using QtPass.", name);
            txn.submit(self.git().commit(&message, Some(&path)));
            return Ok(());
        }

        let result = if is_dir {
            store_fs::remove_tree(&path)
        } else {
            std::fs::remove_file(&path)
        };

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "removal failed");
            txn.fail(e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Writes a recipients file for `path` listing every enabled user, then
    /// commits it and re-encrypts everything below `path`.
    ///
    /// # Errors
    ///
    /// - [`PassError::CannotWrite`]: the recipients file could not be
    ///   written; nothing else happens.
    /// - [`PassError::NoSecretKey`]: none of the enabled users has a private
    ///   key. The file is still written, committed and re-encrypted for.
    pub async fn init(&self, path: impl AsRef<Path>, users: &[UserInfo]) -> Result<ReencryptReport> {
        let dir = self.config.resolve(path);
        let gpg_id = dir.join(RECIPIENTS_FILE);

        let secret_selected = {
            let mut txn = self.transaction(TransactionKind::Init);

            let existed = gpg_id.is_file();
            let written = std::fs::create_dir_all(&dir)
                .and_then(|_| recipients::write_recipients(&gpg_id, users));
            let written = match written {
                Ok(written) => written,
                Err(source) => {
                    self.critical("Cannot update", "Failed to open .gpg-id for writing.");
                    txn.fail(source.to_string());
                    return Err(PassError::CannotWrite {
                        path: gpg_id,
                        source,
                    });
                }
            };

            if !written.secret_selected {
                self.critical(
                    "Check selected users!",
                    "None of the selected keys have a secret key available.\n\
                     You will not be able to decrypt any newly added passwords!",
                );
            }

            if self.config.git_enabled() {
                if !existed && self.config.add_gpg_id {
                    txn.submit(self.git().add(&gpg_id));
                }
                let relative = gpg_id
                    .strip_prefix(&self.config.store_path)
                    .unwrap_or(&gpg_id)
                    .display()
                    .to_string();
                let verb = if existed { "Updated" } else { "Added" };
                let message = format!("{} {} using QtPass.", verb, relative);
                txn.submit(self.git().commit(&message, Some(&gpg_id)));
            }

            info!(dir = %dir.display(), users = users.len(), "recipients written");
            written.secret_selected
        };

        let report = self.reencrypt_path(&dir).await?;

        if secret_selected {
            Ok(report)
        } else {
            Err(PassError::NoSecretKey(gpg_id))
        }
    }

    /// Moves `src` to `dest` and re-encrypts the destination.
    ///
    /// Paths are taken relative to the store root unless absolute; with git
    /// they are handed to `git mv` as given.
    pub async fn move_entry(&self, src: &str, dest: &str, force: bool) -> Result<ReencryptReport> {
        let target = self.relocate(TransactionKind::Move, src, dest, force);
        self.reencrypt_destination(target).await
    }

    /// Copies `src` to `dest` and re-encrypts the destination.
    pub async fn copy(&self, src: &str, dest: &str, force: bool) -> Result<ReencryptReport> {
        let target = self.relocate(TransactionKind::Copy, src, dest, force);
        self.reencrypt_destination(target).await
    }

    /// Issues the move or copy and returns the path that must be
    /// re-encrypted once it has landed.
    fn relocate(&self, kind: TransactionKind, src: &str, dest: &str, force: bool) -> PathBuf {
        let mut txn = self.transaction(kind);
        let src_path = self.config.resolve(src);
        let dest_path = self.config.resolve(dest);

        if self.config.git_enabled() {
            let (invocation, verb) = match kind {
                TransactionKind::Copy => (self.git().cp(src, dest, force), "copied"),
                _ => (self.git().mv(src, dest, force), "moved"),
            };
            txn.submit(invocation);
            let message = format!("{} from {} to {} using QTPass.", verb, src, dest);
            txn.submit(self.git().commit(&message, None));
            return dest_path;
        }

        let landing = store_fs::landing_path(&src_path, &dest_path);
        let copy = kind == TransactionKind::Copy;
        if let Err(e) = store_fs::relocate(&src_path, &landing, force, copy) {
            warn!(
                src = %src_path.display(),
                dest = %landing.display(),
                error = %e,
                "{} failed",
                kind
            );
            txn.fail(e.to_string());
        }
        dest_path
    }

    async fn reencrypt_destination(&self, dest: PathBuf) -> Result<ReencryptReport> {
        // Let a queued git mv/cp land before looking at the destination.
        self.executor.barrier().await?;

        let dir = if dest.is_dir() {
            dest
        } else {
            dest.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.config.store_path.clone())
        };
        self.reencrypt_path(&dir).await
    }
}
