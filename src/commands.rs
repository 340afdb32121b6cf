//! Command lines for git and the crypto tools.

use crate::config::{Config, CryptoTool};
use crate::executor::Invocation;
use std::path::Path;

/// Sentinel reported when a decryption produced nothing usable.
pub const DECRYPT_FAILED: &str = "Could not decrypt";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builds git invocations, run from the store root.
pub(crate) struct Git<'a> {
    config: &'a Config,
}

impl<'a> Git<'a> {
    pub(crate) fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.config.git_executable, args).with_cwd(&self.config.store_path)
    }

    pub(crate) fn init(&self) -> Invocation {
        self.invocation(["init".to_string(), path_arg(&self.config.store_path)])
    }

    pub(crate) fn pull(&self) -> Invocation {
        self.invocation(["pull"])
    }

    pub(crate) fn push(&self) -> Invocation {
        self.invocation(["push"])
    }

    pub(crate) fn add(&self, path: &Path) -> Invocation {
        self.invocation(["add".to_string(), path_arg(path)])
    }

    pub(crate) fn rm(&self, path: &Path, recursive: bool) -> Invocation {
        let flag = if recursive { "-rf" } else { "-f" };
        self.invocation(["rm".to_string(), flag.to_string(), path_arg(path)])
    }

    /// `commit -m <msg> -- <path>`, or a plain commit of the index when no
    /// path is given.
    pub(crate) fn commit(&self, message: &str, path: Option<&Path>) -> Invocation {
        let mut args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
        if let Some(path) = path {
            args.push("--".to_string());
            args.push(path_arg(path));
        }
        self.invocation(args)
    }

    fn relocate(&self, verb: &str, src: &str, dest: &str, force: bool) -> Invocation {
        let mut args = vec![verb.to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(src.to_string());
        args.push(dest.to_string());
        self.invocation(args)
    }

    pub(crate) fn mv(&self, src: &str, dest: &str, force: bool) -> Invocation {
        self.relocate("mv", src, dest, force)
    }

    pub(crate) fn cp(&self, src: &str, dest: &str, force: bool) -> Invocation {
        self.relocate("cp", src, dest, force)
    }
}

/// Builds invocations of the configured crypto tool.
pub(crate) struct Crypto<'a> {
    config: &'a Config,
}

impl<'a> Crypto<'a> {
    pub(crate) fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Decrypts `file` to stdout.
    pub(crate) fn decrypt(&self, file: &Path) -> Invocation {
        match self.config.crypto {
            CryptoTool::Gpg => gpg_decrypt(self.config, file),
            CryptoTool::Keybase => Invocation::new(
                &self.config.keybase_executable,
                ["pgp".to_string(), "decrypt".to_string(), "-i".to_string(), path_arg(file)],
            ),
        }
    }

    /// Encrypts stdin into `file` for `recipients`.
    pub(crate) fn encrypt(
        &self,
        file: &Path,
        recipients: &[String],
        overwrite: bool,
        plaintext: &str,
    ) -> Invocation {
        match self.config.crypto {
            CryptoTool::Gpg => gpg_encrypt(self.config, file, recipients, overwrite, plaintext),
            CryptoTool::Keybase => {
                let mut args = vec![
                    "pgp".to_string(),
                    "encrypt".to_string(),
                    "-o".to_string(),
                    path_arg(file),
                ];
                args.extend(recipients.iter().cloned());
                Invocation::new(&self.config.keybase_executable, args).with_stdin(plaintext)
            }
        }
    }
}

/// `gpg -d` of `file`, non-interactive and quiet.
pub(crate) fn gpg_decrypt(config: &Config, file: &Path) -> Invocation {
    let mut args: Vec<String> = [
        "-d",
        "--quiet",
        "--yes",
        "--no-encrypt-to",
        "--batch",
        "--use-agent",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect();
    args.push(path_arg(file));
    Invocation::new(&config.gpg_executable, args)
}

/// `gpg -eq --output <file> -r <key>... -` reading the plaintext from stdin.
pub(crate) fn gpg_encrypt(
    config: &Config,
    file: &Path,
    recipients: &[String],
    overwrite: bool,
    plaintext: &str,
) -> Invocation {
    let mut args = vec![
        "--batch".to_string(),
        "-eq".to_string(),
        "--output".to_string(),
        path_arg(file),
    ];
    for recipient in recipients {
        args.push("-r".to_string());
        args.push(recipient.clone());
    }
    if overwrite {
        args.push("--yes".to_string());
    }
    args.push("-".to_string());
    Invocation::new(&config.gpg_executable, args).with_stdin(plaintext)
}

/// Lists the keys `file` is encrypted for without decrypting it.
pub(crate) fn gpg_list_recipients(config: &Config, file: &Path) -> Invocation {
    let mut args: Vec<String> = [
        "-v",
        "--no-secmem-warning",
        "--no-permission-warning",
        "--list-only",
        "--keyid-format=long",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect();
    args.push(path_arg(file));
    Invocation::new(&config.gpg_executable, args)
}
