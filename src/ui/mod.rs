//! Presentation-side helpers.
//!
//! - **keymapper**: key names, chords and crossterm events to child input bytes
//! - **renderer**: terminal state into a line-oriented display region
//! - **clipboard**: copy/paste pass-through and clipboard history
//! - **painter**: attribute-aware console drawing for the demo host

pub mod clipboard;
pub mod keymapper;
pub mod painter;
pub mod renderer;

pub use clipboard::{strip_continuation, ClipboardHistory, CONTINUATION};
pub use keymapper::{word_delete_count, Key, KeyChord, KeyEncoder, Modifiers, WordDirection};
pub use painter::ScreenPainter;
pub use renderer::{DisplayRegion, Frame, Renderer, TextBuffer};
