//! Common test utilities for integration tests
//!
//! Builds the producer binary once and manages producer processes so they
//! are always reaped.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

static PRODUCER: OnceLock<PathBuf> = OnceLock::new();

fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.parent().expect("crate has a parent directory").to_path_buf()
}

/// Path to a freshly built corescale-producer (debug profile)
pub fn producer_binary() -> PathBuf {
    PRODUCER
        .get_or_init(|| {
            let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
            let status = Command::new(cargo)
                .args(["build", "--package", "corescale-producer"])
                .current_dir(workspace_root())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .expect("Failed to run cargo build");
            assert!(status.success(), "Building corescale-producer failed");

            let target_dir = std::env::var_os("CARGO_TARGET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| workspace_root().join("target"));
            let path = target_dir.join("debug/corescale-producer");
            assert!(path.is_file(), "Producer binary missing at {}", path.display());
            path
        })
        .clone()
}

/// Guard for a producer process that ensures cleanup
pub struct ProducerGuard {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl ProducerGuard {
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn pid(&self) -> u32 {
        self.process.as_ref().map(|p| p.id()).unwrap_or_default()
    }

    /// Send a line on the producer's stdin
    pub fn send_line(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        writeln!(stdin, "{line}").expect("Failed to write to producer stdin");
        stdin.flush().expect("Failed to flush producer stdin");
    }

    /// Wait for exit and return whether it was successful
    pub fn wait_success(&mut self, timeout: Duration) -> bool {
        let process = self.process.as_mut().expect("process already reaped");
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = process.try_wait() {
                return status.success();
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

/// Start a producer on a private socket and wait until it listens
pub fn start_producer(args: &[&str]) -> Result<ProducerGuard, Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let socket = dir.path().join("producer.sock");

    let mut process = Command::new(producer_binary())
        .args(args)
        .arg("--diagnostic-socket")
        .arg(&socket)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let stdin = process.stdin.take();

    for _ in 0..100 {
        if socket.exists() {
            return Ok(ProducerGuard { process: Some(process), stdin, socket, _dir: dir });
        }
        if let Ok(Some(status)) = process.try_wait() {
            return Err(format!("Producer exited immediately with {status}").into());
        }
        thread::sleep(Duration::from_millis(50));
    }

    let _ = process.kill();
    let _ = process.wait();
    Err("Producer did not open its session socket in time".into())
}
