//! Recipient lists.
//!
//! Every directory of a store may carry a `.gpg-id` file naming the keys its
//! entries (and those of sub-directories without their own `.gpg-id`) are
//! encrypted for.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the per-directory recipients file.
pub const RECIPIENTS_FILE: &str = ".gpg-id";

/// Suffix of encrypted entries.
pub const ENTRY_SUFFIX: &str = ".gpg";

/// A key the user may select when initializing a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub key_id: String,
    #[serde(default)]
    pub name: String,
    /// Selected for the recipients file.
    pub enabled: bool,
    /// A private key for `key_id` is available locally.
    pub have_secret: bool,
}

impl UserInfo {
    pub fn new(key_id: impl Into<String>, enabled: bool, have_secret: bool) -> Self {
        Self {
            key_id: key_id.into(),
            name: String::new(),
            enabled,
            have_secret,
        }
    }
}

/// Finds the `.gpg-id` governing `for_path`.
///
/// Walks up from the directory containing `for_path` (or `for_path` itself
/// when it is a directory) to `store`, returning the first recipients file
/// found. Falls back to the store root's `.gpg-id`.
pub fn recipients_path(store: &Path, for_path: &Path) -> PathBuf {
    let start = if for_path.is_dir() {
        Some(for_path)
    } else {
        for_path.parent()
    };

    let mut dir = start;
    while let Some(current) = dir {
        if !current.starts_with(store) {
            break;
        }
        let candidate = current.join(RECIPIENTS_FILE);
        if candidate.is_file() {
            return candidate;
        }
        dir = current.parent();
    }

    store.join(RECIPIENTS_FILE)
}

/// Reads the recipients governing `for_path`.
///
/// Blank lines and lines starting with `#` are ignored. An unreadable file
/// yields an empty list.
pub fn recipient_list(store: &Path, for_path: &Path) -> Vec<String> {
    match std::fs::read_to_string(recipients_path(store, for_path)) {
        Ok(content) => parse_recipients(&content),
        Err(_) => Vec::new(),
    }
}

/// Parses the content of a recipients file.
pub fn parse_recipients(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Outcome of writing a recipients file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenRecipients {
    /// At least one enabled user has a usable private key.
    pub secret_selected: bool,
}

/// Writes the key id of every enabled user to `path`, one per line.
pub fn write_recipients(path: &Path, users: &[UserInfo]) -> std::io::Result<WrittenRecipients> {
    let mut file = std::fs::File::create(path)?;
    let mut secret_selected = false;

    for user in users.iter().filter(|user| user.enabled) {
        writeln!(file, "{}", user.key_id)?;
        secret_selected |= user.have_secret;
    }
    file.flush()?;

    Ok(WrittenRecipients { secret_selected })
}

/// Extracts the long key ids from `gpg --list-only -v --keyid-format=long`
/// output, sorted.
///
/// The key id is the fifth whitespace-separated field of a line, and only
/// tokens of exactly 16 characters count, e.g.
/// `gpg: public key is 0123456789ABCDEF`.
pub fn parse_listed_keys(output: &str) -> Vec<String> {
    let mut keys: Vec<String> = output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .filter(|token| token.chars().count() == 16)
        .map(str::to_string)
        .collect();
    keys.sort();
    keys
}

/// Compares two recipient sets ignoring order. Key ids compare exactly.
pub fn same_recipients(actual: &[String], intended: &[String]) -> bool {
    let mut actual = actual.to_vec();
    let mut intended = intended.to_vec();
    actual.sort();
    intended.sort();
    actual == intended
}
