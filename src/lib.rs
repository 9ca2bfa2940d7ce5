//! bufterm - a terminal session engine for editor text buffers
//!
//! Runs a shell or any other program on a pseudo-terminal, interprets its
//! output as a VT100/xterm screen, and keeps a host's line-oriented text
//! region in sync with that screen. Keystrokes travel the other way through
//! a key encoder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bufterm::{Config, OpenRequest, SessionEventKind, SessionManager, TextBuffer};
//!
//! let mut manager = SessionManager::new(Config::load());
//! manager.open(1, OpenRequest::command(["/bin/echo", "hi"]), 24, 80)?;
//!
//! let mut buffer = TextBuffer::new(24);
//! 'outer: loop {
//!     for event in manager.poll_events(Duration::from_millis(50)) {
//!         manager.render(event.surface, &mut buffer)?;
//!         if let SessionEventKind::Exited(_) = event.kind {
//!             break 'outer;
//!         }
//!     }
//! }
//! println!("{}", buffer.text());
//! # Ok::<(), bufterm::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod ui;

pub use crate::config::{Config, ShellCommand, ShellConfig};
pub use crate::core::launch::LaunchSpec;
pub use crate::core::pty::{PtyError, PtyProcess};
pub use crate::core::registry::{Registry, SessionRegistry};
pub use crate::core::session::{
    Session, SessionCommand, SessionEvent, SessionEventKind, SessionOptions, SurfaceId,
};
pub use crate::core::term::{ScreenSnapshot, Terminal};
pub use crate::error::{Error, Result};
pub use crate::manager::{OpenRequest, SessionManager, Target};
pub use crate::ui::{
    strip_continuation, ClipboardHistory, DisplayRegion, KeyChord, KeyEncoder, Modifiers,
    Renderer, TextBuffer, WordDirection, CONTINUATION,
};
