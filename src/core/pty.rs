//! Pseudo-terminal process supervisor
//!
//! This module wraps a child process attached to a pseudo-terminal (POSIX pty
//! or Windows ConPTY through `portable-pty`). It owns the master side, accepts
//! writes with a bounded retry, reports liveness and terminates the child on
//! close.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;

use super::launch::LaunchSpec;
use super::lock;

/// Longest a single write may spend waiting on a full input buffer
const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound for the write retry backoff
const MAX_BACKOFF: Duration = Duration::from_millis(20);

/// Liveness poll interval while waiting out the close grace period
const CLOSE_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(String),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// A child process on a pseudo-terminal
pub struct PtyProcess {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    size: Mutex<(u16, u16)>,
    alive: AtomicBool,
    closed: AtomicBool,
    exit_code: Mutex<Option<u32>>,
    grace: Duration,
}

impl PtyProcess {
    /// Allocate a pseudo-terminal of `rows`×`cols` and start `spec` on it
    pub fn spawn(spec: &LaunchSpec, rows: u16, cols: u16, grace: Duration) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(rows, cols))
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(spec.program());
        cmd.args(spec.args());
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("{}: {}", spec.program(), e)))?;
        // Only the child keeps the slave open, so its exit ends our reads
        drop(pair.slave);

        let master = pair.master;
        let writer = master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        #[cfg(unix)]
        set_nonblocking(&*master);

        let pid = child.process_id();
        tracing::info!(pid, rows, cols, program = spec.program(), "spawned child");

        Ok(Self {
            master: Mutex::new(master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            pid,
            size: Mutex::new((rows, cols)),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            exit_code: Mutex::new(None),
            grace,
        })
    }

    /// A second handle on the master for the reader thread.
    /// Reads may fail with `WouldBlock` on POSIX.
    pub fn clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        lock(&self.master)
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code, once the child has been reaped
    pub fn exit_code(&self) -> Option<u32> {
        *lock(&self.exit_code)
    }

    /// Whether the child is still running. Once false, stays false.
    pub fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        let status = lock(&self.child).try_wait();
        match status {
            Ok(None) => true,
            Ok(Some(status)) => {
                *lock(&self.exit_code) = Some(status.exit_code());
                self.mark_dead();
                false
            }
            Err(e) => {
                tracing::debug!(pid = self.pid, "try_wait failed: {}", e);
                self.mark_dead();
                false
            }
        }
    }

    /// Record that the child is gone (I/O failure or observed exit)
    pub fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!(pid = self.pid, "child marked dead");
        }
    }

    /// Deliver `data` to the child's input.
    ///
    /// A full input buffer is retried with a bounded backoff; bytes still
    /// pending after [`WRITE_TIMEOUT`] are dropped. Writing to a dead child
    /// does nothing.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if !self.alive.load(Ordering::Acquire) {
            tracing::debug!(pid = self.pid, len = data.len(), "write to dead child ignored");
            return Ok(());
        }

        let mut writer = lock(&self.writer);
        let mut written = 0;
        let mut backoff = Duration::from_millis(1);
        let deadline = Instant::now() + WRITE_TIMEOUT;

        while written < data.len() {
            match writer.write(&data[written..]) {
                Ok(0) => {
                    self.mark_dead();
                    return Ok(());
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            pid = self.pid,
                            dropped = data.len() - written,
                            "input buffer full, dropping bytes"
                        );
                        return Ok(());
                    }
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    self.mark_dead();
                    return Err(PtyError::Write(e));
                }
            }
        }

        match writer.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(PtyError::Write(e)),
        }
    }

    /// Propagate a window size change. Same size is a no-op.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let mut size = lock(&self.size);
        if *size == (rows, cols) {
            return Ok(());
        }
        lock(&self.master)
            .resize(pty_size(rows, cols))
            .map_err(|e| PtyError::Resize(e.to_string()))?;
        *size = (rows, cols);
        Ok(())
    }

    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Terminate the child: hangup, wait out the grace period, then kill.
    /// Safe to call repeatedly and from any thread.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.is_alive() {
            self.hangup();
            let deadline = Instant::now() + self.grace;
            while Instant::now() < deadline && self.is_alive() {
                thread::sleep(CLOSE_POLL);
            }
        }

        if self.is_alive() {
            tracing::debug!(pid = self.pid, "grace period elapsed, killing child");
            let mut child = lock(&self.child);
            match child.kill() {
                Ok(()) => {
                    if let Ok(status) = child.wait() {
                        *lock(&self.exit_code) = Some(status.exit_code());
                    }
                }
                Err(e) => tracing::warn!(pid = self.pid, "kill failed: {}", e),
            }
        }

        self.mark_dead();
        tracing::info!(pid = self.pid, "closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(unix)]
    fn hangup(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGHUP) {
                tracing::debug!(pid, "SIGHUP failed: {}", e);
            }
        }
    }

    #[cfg(not(unix))]
    fn hangup(&self) {
        // No graceful signal; the grace period just lets a dying child finish
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.close();
    }
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Put the master in non-blocking mode so the reader can observe shutdown
#[cfg(unix)]
fn set_nonblocking(master: &dyn MasterPty) {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let Some(fd) = master.as_raw_fd() else {
        tracing::debug!("master has no raw fd, reads stay blocking");
        return;
    };
    let result = fcntl(fd, FcntlArg::F_GETFL).and_then(|flags| {
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))
    });
    if let Err(e) = result {
        tracing::warn!("Failed to set O_NONBLOCK on pty master: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(cmd: &[&str]) -> LaunchSpec {
        LaunchSpec::resolve(
            cmd.iter().map(|s| s.to_string()).collect(),
            Some(std::env::temp_dir()),
            BTreeMap::new(),
            "xterm",
        )
        .unwrap()
    }

    /// Read until `needle` shows up, EOF, or timeout
    fn read_until(reader: &mut dyn Read, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&out).contains(needle) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5))
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn wait_dead(pty: &PtyProcess) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !pty.is_alive() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_spawn_echo() {
        let pty = PtyProcess::spawn(&spec(&["/bin/echo", "hello"]), 24, 80, Duration::ZERO).unwrap();
        let mut reader = pty.clone_reader().unwrap();
        let output = read_until(reader.as_mut(), "hello", Duration::from_secs(5));
        assert!(output.contains("hello"));
        assert!(wait_dead(&pty));
        assert_eq!(pty.exit_code(), Some(0));
        // Writing after exit is a silent no-op
        assert!(pty.write(b"ignored\n").is_ok());
    }

    #[test]
    fn test_cat_round_trip_and_close() {
        let pty = PtyProcess::spawn(&spec(&["/bin/cat"]), 24, 80, Duration::from_millis(200)).unwrap();
        let mut reader = pty.clone_reader().unwrap();
        pty.write(b"ping\n").unwrap();
        let output = read_until(reader.as_mut(), "ping", Duration::from_secs(5));
        assert!(output.contains("ping"));
        assert!(pty.is_alive());

        pty.close();
        assert!(!pty.is_alive());
        assert!(pty.is_closed());
        pty.close();
    }

    #[test]
    fn test_resize_same_size_is_noop() {
        let pty = PtyProcess::spawn(&spec(&["/bin/cat"]), 24, 80, Duration::ZERO).unwrap();
        pty.resize(24, 80).unwrap();
        pty.resize(30, 100).unwrap();
        assert_eq!(pty.size(), (30, 100));
        pty.close();
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let result = PtyProcess::spawn(
            &spec(&["/definitely/not/a/real/binary"]),
            24,
            80,
            Duration::ZERO,
        );
        assert!(matches!(result, Err(PtyError::Spawn(_))));
    }
}
