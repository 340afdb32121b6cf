//! Shared fixtures for the store integration tests.
//!
//! The fake tools keep "ciphertext" readable: an entry is a header line
//! naming the keys it is encrypted for, followed by the plaintext. That is
//! enough to emulate `gpg --list-only`, `gpg -d` and `gpg -eq` against a
//! temporary store, and to assert on the result afterwards.

#![allow(dead_code)]

use passmux::executor::mock::{CallLog, MockRunner};
use passmux::executor::{Invocation, ProcessOutput};
use passmux::{Config, FinishedTransaction, Store, StoreEvent, StoreEvents};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const KEY_A: &str = "AAAA1111AAAA1111";
pub const KEY_B: &str = "BBBB2222BBBB2222";

const HEADER: &str = "keys=";

pub struct Fixture {
    pub dir: TempDir,
    pub store: Store,
    pub events: StoreEvents,
    pub calls: CallLog,
}

impl Fixture {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Waits for the next consolidated completion.
    pub async fn finished(&mut self) -> FinishedTransaction {
        tokio::time::timeout(Duration::from_secs(5), self.events.next_finished())
            .await
            .expect("timed out waiting for transaction")
            .expect("event stream closed")
    }

    /// Titles of the critical events queued so far.
    pub fn critical_titles(&mut self) -> Vec<String> {
        self.events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Critical { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Store on a fresh temp directory answered by [`fake_tools`].
pub fn fixture(configure: impl FnOnce(Config) -> Config) -> Fixture {
    fixture_with(configure, fake_tools)
}

pub fn fixture_with<F>(configure: impl FnOnce(Config) -> Config, handler: F) -> Fixture
where
    F: Fn(&Invocation) -> ProcessOutput + Send + Sync + 'static,
{
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = MockRunner::with_handler(handler);
    let calls = runner.calls();
    let (store, events) = Store::with_runner(configure(Config::new(dir.path())), runner);

    Fixture {
        dir,
        store,
        events,
        calls,
    }
}

pub fn set_recipients(dir: &Path, keys: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let content: String = keys.iter().map(|key| format!("{}\n", key)).collect();
    fs::write(dir.join(".gpg-id"), content).unwrap();
}

pub fn write_entry(path: &Path, keys: &[&str], plaintext: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("{}{}\n{}", HEADER, keys.join(","), plaintext)).unwrap();
}

/// Keys and plaintext of an entry written by the fake tools.
pub fn read_entry(path: &Path) -> (Vec<String>, String) {
    let content = fs::read_to_string(path).unwrap();
    parse_entry(&content).unwrap_or_else(|| panic!("{} is not a fake entry", path.display()))
}

fn parse_entry(content: &str) -> Option<(Vec<String>, String)> {
    let (header, plaintext) = content.split_once('\n')?;
    let keys = header
        .strip_prefix(HEADER)?
        .split(',')
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect();
    Some((keys, plaintext.to_string()))
}

/// Emulates gpg and git well enough for the store operations.
pub fn fake_tools(inv: &Invocation) -> ProcessOutput {
    match inv.program.as_str() {
        "gpg" => fake_gpg(inv),
        "git" => fake_git(inv),
        _ => ProcessOutput::failed(127, format!("{}: command not found", inv.program)),
    }
}

fn fake_gpg(inv: &Invocation) -> ProcessOutput {
    if inv.has_arg("-eq") {
        let Some(pos) = inv.args.iter().position(|a| a == "--output") else {
            return ProcessOutput::failed(2, "gpg: no output file");
        };
        let output = PathBuf::from(&inv.args[pos + 1]);
        let keys: Vec<&str> = inv
            .args
            .windows(2)
            .filter(|pair| pair[0] == "-r")
            .map(|pair| pair[1].as_str())
            .collect();
        let plaintext = inv.stdin.clone().unwrap_or_default();
        return match fs::write(&output, format!("{}{}\n{}", HEADER, keys.join(","), plaintext)) {
            Ok(()) => ProcessOutput::ok(""),
            Err(e) => ProcessOutput::failed(2, format!("gpg: {}", e)),
        };
    }

    let Some(file) = inv.args.last() else {
        return ProcessOutput::failed(2, "gpg: no file");
    };
    let content = match fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => return ProcessOutput::failed(2, format!("gpg: can't open '{}': {}", file, e)),
    };

    if inv.has_arg("--list-only") {
        let keys = parse_entry(&content).map(|(keys, _)| keys).unwrap_or_default();
        let stderr: String = keys
            .iter()
            .map(|key| format!("gpg: public key is {}\n", key))
            .collect();
        return ProcessOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr,
        };
    }

    if inv.has_arg("-d") {
        return match parse_entry(&content) {
            Some((_, plaintext)) => ProcessOutput::ok(plaintext),
            None => ProcessOutput::failed(2, "gpg: decryption failed: No secret key"),
        };
    }

    ProcessOutput::failed(2, "gpg: unsupported invocation")
}

/// Records everything; `mv` and `cp` are carried out so a following
/// re-encryption finds the entries where git would have put them.
fn fake_git(inv: &Invocation) -> ProcessOutput {
    let verb = inv.args.first().map(String::as_str);
    if !matches!(verb, Some("mv") | Some("cp")) {
        return ProcessOutput::ok("");
    }

    let cwd = inv.cwd.clone().unwrap_or_default();
    let operands: Vec<&String> = inv.args[1..].iter().filter(|a| *a != "-f").collect();
    let [src, dest] = operands.as_slice() else {
        return ProcessOutput::failed(128, "usage: git mv <source> <destination>");
    };
    let (src, dest) = (cwd.join(src), cwd.join(dest));

    let result = fs::create_dir_all(dest.parent().unwrap_or(&cwd)).and_then(|_| {
        if verb == Some("mv") {
            fs::rename(&src, &dest)
        } else {
            fs::copy(&src, &dest).map(|_| ())
        }
    });
    match result {
        Ok(()) => ProcessOutput::ok(""),
        Err(e) => ProcessOutput::failed(128, format!("fatal: {}", e)),
    }
}
