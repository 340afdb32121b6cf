//! Store configuration.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tool used to encrypt and decrypt entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoTool {
    /// GnuPG (`gpg`)
    Gpg,
    /// Keybase PGP (`keybase pgp ...`)
    Keybase,
}

impl std::fmt::Display for CryptoTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpg => write!(f, "gpg"),
            Self::Keybase => write!(f, "keybase"),
        }
    }
}

/// Configuration for a password store.
///
/// Use the builder pattern for ergonomic configuration:
///
/// ```
/// use passmux::{Config, CryptoTool};
///
/// let config = Config::new("/home/user/.password-store")
///     .with_crypto(CryptoTool::Gpg)
///     .with_git(true)
///     .with_auto_push(true);
///
/// assert!(config.git_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the password store (default: ~/.password-store)
    pub store_path: PathBuf,

    /// Encryption tool used for show and insert
    pub crypto: CryptoTool,

    /// gpg executable (always used for listing recipients and re-encryption)
    pub gpg_executable: String,

    /// git executable; empty disables git
    pub git_executable: String,

    /// keybase executable
    pub keybase_executable: String,

    /// Track the store with git
    pub use_git: bool,

    /// Remote-storage mode; bypasses local git entirely
    pub use_webdav: bool,

    /// Pull before re-encrypting
    pub auto_pull: bool,

    /// Push after re-encrypting
    pub auto_push: bool,

    /// Stage a newly created `.gpg-id` with `git add`
    pub add_gpg_id: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            crypto: CryptoTool::Gpg,
            gpg_executable: "gpg".to_string(),
            git_executable: "git".to_string(),
            keybase_executable: "keybase".to_string(),
            use_git: true,
            use_webdav: false,
            auto_pull: false,
            auto_push: false,
            add_gpg_id: true,
        }
    }
}

fn default_store_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".password-store")
}

impl Config {
    /// Creates a configuration rooted at `store_path`.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Default::default()
        }
    }

    /// Builds a configuration from the environment variables `pass` itself
    /// honors: `PASSWORD_STORE_DIR`, `PASSWORD_STORE_GPG` and
    /// `PASSWORD_STORE_GIT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("PASSWORD_STORE_DIR") {
            config.store_path = PathBuf::from(dir);
        }
        if let Ok(gpg) = std::env::var("PASSWORD_STORE_GPG") {
            config.gpg_executable = gpg;
        }
        if let Ok(git) = std::env::var("PASSWORD_STORE_GIT") {
            config.git_executable = git;
        }

        config
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the password store root.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Selects the encryption tool.
    pub fn with_crypto(mut self, crypto: CryptoTool) -> Self {
        self.crypto = crypto;
        self
    }

    /// Sets the gpg executable.
    pub fn with_gpg_executable(mut self, program: impl Into<String>) -> Self {
        self.gpg_executable = program.into();
        self
    }

    /// Sets the git executable.
    pub fn with_git_executable(mut self, program: impl Into<String>) -> Self {
        self.git_executable = program.into();
        self
    }

    /// Sets the keybase executable.
    pub fn with_keybase_executable(mut self, program: impl Into<String>) -> Self {
        self.keybase_executable = program.into();
        self
    }

    /// Enables or disables git tracking.
    pub fn with_git(mut self, enabled: bool) -> Self {
        self.use_git = enabled;
        self
    }

    /// Enables or disables remote-storage mode.
    pub fn with_webdav(mut self, enabled: bool) -> Self {
        self.use_webdav = enabled;
        self
    }

    /// Pull from the remote before re-encrypting.
    pub fn with_auto_pull(mut self, enabled: bool) -> Self {
        self.auto_pull = enabled;
        self
    }

    /// Push to the remote after re-encrypting.
    pub fn with_auto_push(mut self, enabled: bool) -> Self {
        self.auto_push = enabled;
        self
    }

    /// Stage newly created recipients files.
    pub fn with_add_gpg_id(mut self, enabled: bool) -> Self {
        self.add_gpg_id = enabled;
        self
    }

    /// Returns true when mutations should be staged and committed with git.
    pub fn git_enabled(&self) -> bool {
        self.use_git && !self.use_webdav && !self.git_executable.is_empty()
    }

    /// Executable used for show and insert.
    pub fn crypto_executable(&self) -> &str {
        match self.crypto {
            CryptoTool::Gpg => &self.gpg_executable,
            CryptoTool::Keybase => &self.keybase_executable,
        }
    }

    /// Resolves `path` against the store root unless it is already absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.store_path.join(path)
        }
    }

    /// Store-relative name of `path` with the `.gpg` suffix removed.
    ///
    /// ```
    /// use passmux::Config;
    ///
    /// let config = Config::new("/store");
    /// assert_eq!(config.entry_name("/store/web/mail.gpg"), "web/mail");
    /// assert_eq!(config.entry_name("/elsewhere/x.gpg"), "/elsewhere/x");
    /// ```
    pub fn entry_name(&self, path: impl AsRef<Path>) -> String {
        let path = path.as_ref();
        let relative = path.strip_prefix(&self.store_path).unwrap_or(path);
        let name = relative.to_string_lossy();
        name.strip_suffix(".gpg").unwrap_or(&name).to_string()
    }
}
