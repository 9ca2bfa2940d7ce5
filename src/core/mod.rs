//! Core terminal session components.
//!
//! This module contains the session engine below the presentation layer:
//!
//! - **launch**: open-request validation (working directory, TERM, LANG)
//! - **pty**: pseudo-terminal process supervisor
//! - **term**: VT100/VT220 screen model and escape sequence parser
//! - **session**: a running terminal, its reader thread and control commands
//! - **registry**: surface and tag lookup for live sessions
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry
//! └── Session (one per display surface)
//!     ├── PtyProcess (child I/O, liveness, close)
//!     ├── reader thread ──events──> presentation loop
//!     └── Mutex<Terminal>
//!         ├── TerminalState (grid, cursor, scrollback, modes)
//!         └── VtParser (ANSI escape sequences, UTF-8)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod launch;
pub mod pty;
pub mod registry;
pub mod session;
pub mod term;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
