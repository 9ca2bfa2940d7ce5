//! Session management
//!
//! A session couples a child on a pseudo-terminal with the terminal it
//! draws into. A dedicated reader thread moves child output through the
//! parser and notifies the presentation side over a channel; everything
//! else (input, resize, copy, close) happens on the caller's thread.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::launch::LaunchSpec;
use super::lock;
use super::pty::{PtyError, PtyProcess};
use super::term::{ScreenSnapshot, Terminal, TerminalEvent, TerminalModes};
use crate::error::{Error, Result};
use crate::ui::clipboard::{paste_payload, strip_continuation};
use crate::ui::keymapper::{KeyEncoder, Modifiers, WordDirection};

/// Identity of the display surface a session draws into
pub type SurfaceId = u64;

/// Read buffer size for child output
const READ_CHUNK: usize = 4096;

/// Sleep between reads while the child is quiet
const READ_POLL: Duration = Duration::from_millis(5);

/// How long the reader waits for the child to be reaped after end-of-stream
const EXIT_WAIT: Duration = Duration::from_secs(1);

/// Source of [`Session::serial`] values
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Notification from a reader thread to the presentation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub surface: SurfaceId,
    /// Serial of the session that sent it; tells a replaced session's
    /// stragglers apart from the current one on a reused surface
    pub session: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    /// The screen changed and a render is due
    RenderReady,
    TitleChanged(String),
    /// The child asked to set the clipboard (OSC 52)
    ClipboardSet(String),
    Bell,
    /// The child is gone; carries the exit code when known
    Exited(Option<u32>),
}

/// Operations a host can run against a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SendString(String),
    SendKey { key: String, modifiers: Modifiers },
    DeleteWord(WordDirection),
    /// Select the grid text between two (col, row) cells
    Select { start: (u16, u16), end: (u16, u16) },
    /// Yields the selected text
    Copy,
    Paste { text: String, bracketed: bool },
    Resize { rows: u16, cols: u16 },
    Close,
}

/// Grid and process settings for a new session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub rows: u16,
    pub cols: u16,
    pub scrollback_limit: Option<usize>,
    pub close_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            scrollback_limit: Some(super::term::state::DEFAULT_SCROLLBACK),
            close_grace: Duration::from_millis(500),
        }
    }
}

/// A running terminal session
pub struct Session {
    surface: SurfaceId,
    serial: u64,
    tag: Option<String>,
    title: String,
    spec: LaunchSpec,
    terminal: Arc<Mutex<Terminal>>,
    pty: Arc<PtyProcess>,
    /// Cleared on close; the reader exits when it sees this
    running: Arc<AtomicBool>,
    /// Set when a render is owed, cleared by the presenter
    render_pending: Arc<AtomicBool>,
    /// Lets caller-side changes such as resize notify the presenter
    sink: Mutex<EventSink>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Spawn `spec` on a new pseudo-terminal and start reading its output
    pub fn open(
        surface: SurfaceId,
        tag: Option<String>,
        title: String,
        spec: LaunchSpec,
        options: SessionOptions,
        events: Sender<SessionEvent>,
    ) -> Result<Arc<Self>> {
        let pty = PtyProcess::spawn(&spec, options.rows, options.cols, options.close_grace)
            .map_err(|e| match e {
                PtyError::Spawn(msg) => Error::Spawn(msg),
                other => Error::Pty(other),
            })?;
        let pty = Arc::new(pty);
        let reader = pty.clone_reader()?;

        let terminal = Arc::new(Mutex::new(Terminal::new(
            options.cols,
            options.rows,
            options.scrollback_limit,
        )));
        let running = Arc::new(AtomicBool::new(true));
        let render_pending = Arc::new(AtomicBool::new(false));
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let sink = EventSink {
            surface,
            serial,
            render_pending: Arc::clone(&render_pending),
            events,
        };

        let ctx = ReaderContext {
            surface,
            terminal: Arc::clone(&terminal),
            pty: Arc::clone(&pty),
            running: Arc::clone(&running),
            sink: sink.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("bufterm-reader-{}", surface))
            .spawn(move || ctx.run(reader))
            .map_err(|e| Error::Spawn(format!("reader thread: {}", e)))?;

        tracing::info!(surface, serial, pid = pty.pid(), "session opened");

        Ok(Arc::new(Self {
            surface,
            serial,
            tag,
            title,
            spec,
            terminal,
            pty,
            running,
            render_pending,
            sink: Mutex::new(sink),
            reader_thread: Mutex::new(Some(handle)),
        }))
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Unique per opened session, even when surfaces are reused
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Title set by the child, else the one given at open
    pub fn title(&self) -> String {
        let terminal = lock(&self.terminal);
        if terminal.state.title.is_empty() {
            self.title.clone()
        } else {
            terminal.state.title.clone()
        }
    }

    pub fn is_alive(&self) -> bool {
        self.pty.is_alive()
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.pty.exit_code()
    }

    /// Run a host command. Only [`SessionCommand::Copy`] yields text.
    pub fn apply(&self, command: SessionCommand) -> Result<Option<String>> {
        match command {
            SessionCommand::SendString(text) => self.send_string(&text),
            SessionCommand::SendKey { key, modifiers } => self.send_key(&key, modifiers),
            SessionCommand::DeleteWord(direction) => self.delete_word(direction),
            SessionCommand::Select { start, end } => self.select(start, end),
            SessionCommand::Copy => return Ok(self.copy()),
            SessionCommand::Paste { text, bracketed } => self.paste(&text, bracketed),
            SessionCommand::Resize { rows, cols } => self.resize(rows, cols)?,
            SessionCommand::Close => self.close(),
        }
        Ok(None)
    }

    /// Deliver raw bytes to the child. Failures mean the child is gone and
    /// are logged, not raised.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Err(e) = self.pty.write(data) {
            tracing::debug!(surface = self.surface, "write failed: {}", e);
        }
    }

    pub fn send_string(&self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Encode a named key against the current modes and send it
    pub fn send_key(&self, key: &str, modifiers: Modifiers) {
        self.write(&KeyEncoder::encode(key, modifiers, &self.modes()));
    }

    /// Delete one word next to the cursor with repeated backspace/delete
    pub fn delete_word(&self, direction: WordDirection) {
        if !self.is_alive() {
            return;
        }
        let (line, cursor) = lock(&self.terminal).state.cursor_line();
        self.write(&KeyEncoder::delete_word(&line, cursor, direction));
    }

    /// Paste host text; bracketed when asked or when the child enabled it
    pub fn paste(&self, text: &str, bracketed: bool) {
        let bracketed = bracketed || lock(&self.terminal).state.modes.bracketed_paste;
        self.write(&paste_payload(text, bracketed));
    }

    pub fn select(&self, start: (u16, u16), end: (u16, u16)) {
        let mut terminal = lock(&self.terminal);
        terminal.state.start_selection(start.0, start.1);
        terminal.state.update_selection(end.0, end.1);
    }

    /// Selected text with continuation markers stripped
    pub fn copy(&self) -> Option<String> {
        let text = lock(&self.terminal).state.get_selected_text()?;
        Some(strip_continuation(&text))
    }

    /// Resize the grid and the pseudo-terminal. Same size is a no-op.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        {
            let mut terminal = lock(&self.terminal);
            terminal.resize(cols, rows);
        }
        if self.pty.is_alive() {
            self.pty.resize(rows, cols)?;
        }
        lock(&self.sink).request_render();
        Ok(())
    }

    /// Terminate the child and stop the reader. Idempotent.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::AcqRel) && self.pty.is_closed() {
            return;
        }
        self.pty.close();

        let handle = lock(&self.reader_thread).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!(surface = self.surface, "reader thread panicked");
            }
        }
        tracing::info!(surface = self.surface, "session closed");
    }

    pub fn modes(&self) -> TerminalModes {
        lock(&self.terminal).state.modes.clone()
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        lock(&self.terminal).snapshot()
    }

    /// Run `f` with the terminal locked
    pub fn with_terminal<R>(&self, f: impl FnOnce(&Terminal) -> R) -> R {
        f(&lock(&self.terminal))
    }

    /// Clear and return the pending-render flag
    pub fn take_render_request(&self) -> bool {
        self.render_pending.swap(false, Ordering::AcqRel)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// State shared with the reader thread
struct ReaderContext {
    surface: SurfaceId,
    terminal: Arc<Mutex<Terminal>>,
    pty: Arc<PtyProcess>,
    running: Arc<AtomicBool>,
    sink: EventSink,
}

impl ReaderContext {
    fn run(self, mut reader: Box<dyn Read + Send>) {
        let mut buffer = vec![0u8; READ_CHUNK];

        loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => self.process(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.pty.is_alive() {
                        self.drain(&mut *reader, &mut buffer);
                        break;
                    }
                    thread::sleep(READ_POLL);
                }
                Err(e) => {
                    // EIO once the child side is gone
                    tracing::debug!(surface = self.surface, "read ended: {}", e);
                    break;
                }
            }
        }

        self.finish();
    }

    /// Consume whatever the child left in the buffer before exiting
    fn drain(&self, reader: &mut dyn Read, buffer: &mut [u8]) {
        loop {
            match reader.read(buffer) {
                Ok(n) if n > 0 => self.process(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                _ => break,
            }
        }
    }

    fn process(&self, data: &[u8]) {
        let (reply, events) = {
            let mut terminal = lock(&self.terminal);
            let reply = terminal.feed(data);
            (reply, terminal.take_events())
        };

        if !reply.is_empty() {
            if let Err(e) = self.pty.write(&reply) {
                tracing::debug!(surface = self.surface, "reply write failed: {}", e);
            }
        }

        for event in events {
            let kind = match event {
                TerminalEvent::Bell => SessionEventKind::Bell,
                TerminalEvent::TitleChanged(title) => SessionEventKind::TitleChanged(title),
                TerminalEvent::ClipboardSet(text) => SessionEventKind::ClipboardSet(text),
            };
            self.sink.send(kind);
        }

        self.sink.request_render();
    }

    fn finish(&self) {
        let deadline = Instant::now() + EXIT_WAIT;
        while self.pty.is_alive() && Instant::now() < deadline {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(READ_POLL);
        }
        self.pty.mark_dead();
        self.running.store(false, Ordering::Release);

        let code = self.pty.exit_code();
        tracing::info!(surface = self.surface, exit_code = code, "child exited");
        self.sink.send(SessionEventKind::Exited(code));
    }
}

/// One session's end of the event channel
#[derive(Clone)]
struct EventSink {
    surface: SurfaceId,
    serial: u64,
    render_pending: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
}

impl EventSink {
    fn send(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            surface: self.surface,
            session: self.serial,
            kind,
        };
        if self.events.send(event).is_err() {
            tracing::debug!(surface = self.surface, "event receiver gone");
        }
    }

    /// Mark a render as owed. Only the first request after the presenter
    /// last rendered sends `RenderReady`.
    fn request_render(&self) {
        if !self.render_pending.swap(true, Ordering::AcqRel) {
            self.send(SessionEventKind::RenderReady);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::mpsc::{self, Receiver};

    fn open(cmd: &[&str]) -> (Arc<Session>, Receiver<SessionEvent>) {
        let spec = LaunchSpec::resolve(
            cmd.iter().map(|s| s.to_string()).collect(),
            Some(std::env::temp_dir()),
            BTreeMap::new(),
            "xterm",
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();
        let options = SessionOptions {
            rows: 10,
            cols: 40,
            ..SessionOptions::default()
        };
        let session = Session::open(1, None, "test".into(), spec, options, tx).unwrap();
        (session, rx)
    }

    fn wait_exit(rx: &Receiver<SessionEvent>) -> Option<u32> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
                if let SessionEventKind::Exited(code) = event.kind {
                    return code;
                }
            }
        }
        panic!("child did not exit");
    }

    fn wait_for_text(session: &Session, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if session.snapshot().lines().iter().any(|l| l.contains(needle)) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_echo_output_and_exit() {
        let (session, rx) = open(&["/bin/echo", "hello"]);
        assert_eq!(wait_exit(&rx), Some(0));
        assert!(!session.is_alive());
        assert!(session.snapshot().lines()[0].starts_with("hello"));
        assert!(session.take_render_request());

        // Writes after exit do nothing
        session.send_string("ignored\n");
        session.close();
        session.close();
    }

    #[test]
    fn test_cat_echoes_input() {
        let (session, _rx) = open(&["/bin/cat"]);
        session.send_string("ping\n");
        assert!(wait_for_text(&session, "ping"));
        session.apply(SessionCommand::Close).unwrap();
        assert!(!session.is_alive());
    }

    #[test]
    fn test_resize_command() {
        let (session, _rx) = open(&["/bin/cat"]);
        session
            .apply(SessionCommand::Resize { rows: 5, cols: 20 })
            .unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.rows.len(), 5);
        assert!(session.take_render_request());
        session.close();
    }

    #[test]
    fn test_resize_notifies_and_output_still_notifies() {
        let (session, rx) = open(&["/bin/cat"]);
        session.resize(6, 30).unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.kind, SessionEventKind::RenderReady);
        assert_eq!(event.session, session.serial());

        // The presenter renders, then new output must notify again
        assert!(session.take_render_request());
        session.send_string("after\n");
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut notified = false;
        while Instant::now() < deadline && !notified {
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
                notified = event.kind == SessionEventKind::RenderReady;
            }
        }
        assert!(notified);
        session.close();
    }

    #[test]
    fn test_serials_are_unique() {
        let (first, _rx1) = open(&["/bin/cat"]);
        let (second, _rx2) = open(&["/bin/cat"]);
        assert_ne!(first.serial(), second.serial());
        first.close();
        second.close();
    }

    #[test]
    fn test_select_and_copy() {
        let (session, rx) = open(&["/bin/echo", "copy me"]);
        wait_exit(&rx);
        session
            .apply(SessionCommand::Select {
                start: (0, 0),
                end: (6, 0),
            })
            .unwrap();
        assert_eq!(
            session.apply(SessionCommand::Copy).unwrap(),
            Some("copy me".to_string())
        );
    }

    #[test]
    fn test_title_defaults_to_open_title() {
        let (session, rx) = open(&["/bin/echo"]);
        wait_exit(&rx);
        assert_eq!(session.title(), "test");
    }
}
