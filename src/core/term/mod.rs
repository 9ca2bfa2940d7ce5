//! Terminal emulation: the VT parser driving the screen model

pub mod parser;
pub mod state;
pub mod utf8;

pub use parser::{Response, VtParser};
pub use state::{
    AttrFlags, CellAttrs, Color, CursorPosition, RenderRow, ScreenSnapshot, TerminalEvent, TerminalModes,
    TerminalState, TextRun,
};

/// A screen model paired with the parser that feeds it
pub struct Terminal {
    pub state: TerminalState,
    parser: VtParser,
}

impl Terminal {
    pub fn new(cols: u16, rows: u16, scrollback_limit: Option<usize>) -> Self {
        Self {
            state: TerminalState::with_scrollback(cols, rows, scrollback_limit),
            parser: VtParser::new(),
        }
    }

    /// Interpret a chunk of child output. Returns the bytes owed back to the
    /// child (status and attribute reports), already encoded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.parser
            .advance(bytes, &mut self.state)
            .iter()
            .flat_map(Response::to_bytes)
            .collect()
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.state.resize(cols, rows);
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        self.state.snapshot()
    }

    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        self.state.take_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_returns_encoded_replies() {
        let mut term = Terminal::new(10, 3, None);
        let reply = term.feed(b"ab\x1b[6n\x1b[c");
        assert_eq!(reply, b"\x1b[1;3R\x1b[?62;c");
    }

    #[test]
    fn test_unbounded_scrollback() {
        let mut term = Terminal::new(4, 1, None);
        for _ in 0..50 {
            term.feed(b"x\r\n");
        }
        assert_eq!(term.state.primary_screen.scrollback.len(), 50);
        assert_eq!(term.snapshot().scrollback_total, 50);
    }
}
