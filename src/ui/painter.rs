//! Console painter for the demo host
//!
//! Draws a screen snapshot, attributes included, onto the real terminal
//! with crossterm.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::term::{AttrFlags, CellAttrs, ScreenSnapshot};

/// Owns raw mode and the alternate screen while alive
pub struct ScreenPainter {
    initialized: bool,
}

impl ScreenPainter {
    /// Enter raw mode and the alternate screen
    pub fn init() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        Ok(Self { initialized: true })
    }

    /// Restore the console. Runs on drop if not called.
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show, EnableLineWrap, LeaveAlternateScreen);
        let _ = stdout.flush();
        terminal::disable_raw_mode()
    }

    /// Paint every row of `snapshot`, then place the cursor
    pub fn paint(&self, snapshot: &ScreenSnapshot) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = io::BufWriter::with_capacity(65536, stdout.lock());

        // Synchronized update (reduces flicker)
        write!(stdout, "\x1b[?2026h")?;
        queue!(stdout, Hide)?;

        for (row_idx, row) in snapshot.rows.iter().enumerate() {
            queue!(stdout, MoveTo(0, row_idx as u16), Clear(ClearType::UntilNewLine))?;
            for run in &row.runs {
                apply_attrs(&mut stdout, &run.attrs)?;
                queue!(stdout, Print(&run.text))?;
            }
            queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;
        }

        let cursor = snapshot.cursor;
        queue!(stdout, MoveTo(cursor.col, cursor.row))?;
        if cursor.visible {
            queue!(stdout, Show)?;
        }

        write!(stdout, "\x1b[?2026l")?;
        stdout.flush()
    }

    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

impl Drop for ScreenPainter {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Apply cell attributes
fn apply_attrs<W: Write>(out: &mut W, attrs: &CellAttrs) -> io::Result<()> {
    queue!(out, SetAttribute(Attribute::Reset))?;

    let styles = [
        (AttrFlags::BOLD, Attribute::Bold),
        (AttrFlags::DIM, Attribute::Dim),
        (AttrFlags::ITALIC, Attribute::Italic),
        (AttrFlags::UNDERLINE, Attribute::Underlined),
        (AttrFlags::BLINK, Attribute::SlowBlink),
        (AttrFlags::INVERSE, Attribute::Reverse),
        (AttrFlags::HIDDEN, Attribute::Hidden),
        (AttrFlags::STRIKETHROUGH, Attribute::CrossedOut),
    ];
    for (flag, attribute) in styles {
        if attrs.flags.contains(flag) {
            queue!(out, SetAttribute(attribute))?;
        }
    }

    let fg = attrs.fg.to_crossterm();
    if fg != crossterm::style::Color::Reset {
        queue!(out, SetForegroundColor(fg))?;
    }
    let bg = attrs.bg.to_crossterm();
    if bg != crossterm::style::Color::Reset {
        queue!(out, SetBackgroundColor(bg))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Color;

    #[test]
    fn test_apply_attrs_emits_sgr() {
        let attrs = CellAttrs {
            fg: Color::Indexed(1),
            bg: Color::Default,
            flags: AttrFlags::BOLD | AttrFlags::UNDERLINE,
        };
        let mut out = Vec::new();
        apply_attrs(&mut out, &attrs).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("\x1b[0m"));
        assert!(text.contains("\x1b[1m"));
        assert!(text.contains("\x1b[4m"));
        assert!(text.contains("\x1b[38;5;1m"));
    }

    #[test]
    fn test_default_attrs_only_reset() {
        let mut out = Vec::new();
        apply_attrs(&mut out, &CellAttrs::default()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\x1b[0m");
    }
}
