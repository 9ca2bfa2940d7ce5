//! Renderer: projects terminal state into a line-oriented display region
//!
//! The region holds the scrollback followed by the active grid, one line
//! per row. Each render diffs the new document against what was drawn last
//! time and issues the fewest contiguous line replacements it can.

use unicode_width::UnicodeWidthChar;

use super::clipboard::CONTINUATION;
use crate::core::term::{RenderRow, ScreenSnapshot, Terminal};

/// Lines of slack within which the viewport still follows the cursor
const FOLLOW_SLACK: usize = 2;

/// A host text area the renderer can edit
pub trait DisplayRegion {
    fn line_count(&self) -> usize;

    /// Replace lines `start..end` with `lines` (which may differ in count)
    fn replace_lines(&mut self, start: usize, end: usize, lines: &[String]);

    /// Place the caret at a character offset on a line
    fn set_cursor(&mut self, line: usize, col: usize);

    /// Index of the last line currently shown
    fn viewport_bottom(&self) -> usize;

    /// Scroll so `line` is visible
    fn scroll_to_line(&mut self, line: usize);
}

/// Everything a render needs, captured under the terminal lock
#[derive(Debug, Clone)]
pub struct Frame {
    /// Absolute index of the first row in `scrollback`
    pub scrollback_from: u64,
    /// Scrollback rows not yet drawn
    pub scrollback: Vec<RenderRow>,
    pub snapshot: ScreenSnapshot,
}

/// Per-surface render state
#[derive(Debug, Default)]
pub struct Renderer {
    /// Document as last drawn
    lines: Vec<String>,
    /// Absolute scrollback index of `lines[0]`
    first_row: u64,
    /// How many leading entries of `lines` are scrollback
    scrollback_len: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute index just past the last scrollback row already drawn
    fn drawn_until(&self) -> u64 {
        self.first_row + self.scrollback_len as u64
    }

    /// Capture a frame. Call with the terminal locked; the rest of the
    /// render happens in [`apply`](Self::apply) without the lock.
    pub fn prepare(&self, terminal: &Terminal) -> Frame {
        let snapshot = terminal.snapshot();
        let from = self.drawn_until().max(snapshot.scrollback_evicted);
        Frame {
            scrollback_from: from,
            scrollback: terminal.state.scrollback_rows(from),
            snapshot,
        }
    }

    /// Bring `region` up to date with `frame`
    pub fn apply(&mut self, frame: Frame, region: &mut dyn DisplayRegion) {
        let follow =
            region.line_count().saturating_sub(1) <= region.viewport_bottom() + FOLLOW_SLACK;

        self.drop_evicted(frame.snapshot.scrollback_evicted, region);

        // A gap means rows were evicted before we ever drew them
        if frame.scrollback_from > self.drawn_until() {
            self.first_row = frame.scrollback_from - self.scrollback_len as u64;
        }

        let mut document: Vec<String> = self.lines[..self.scrollback_len].to_vec();
        document.extend(frame.scrollback.iter().map(|row| format_row(row, None)));
        let scrollback_len = document.len();

        let cursor = frame.snapshot.cursor;
        let mut cursor_col = 0;
        for (i, row) in frame.snapshot.rows.iter().enumerate() {
            if i == cursor.row as usize {
                cursor_col = char_offset(&row.text(), cursor.col as usize);
                document.push(format_row(row, Some(cursor_col)));
            } else {
                document.push(format_row(row, None));
            }
        }

        let edits = diff_lines(&self.lines, &document);
        for edit in &edits {
            region.replace_lines(edit.start, edit.end, &document[edit.new_start..edit.new_end]);
        }
        if !edits.is_empty() {
            tracing::trace!(edits = edits.len(), lines = document.len(), "rendered");
        }

        self.lines = document;
        self.scrollback_len = scrollback_len;

        let cursor_line = scrollback_len + cursor.row as usize;
        region.set_cursor(cursor_line, cursor_col);
        if follow {
            region.scroll_to_line(cursor_line);
        }
    }

    /// Prepare and apply in one step
    pub fn render(&mut self, terminal: &Terminal, region: &mut dyn DisplayRegion) {
        let frame = self.prepare(terminal);
        self.apply(frame, region);
    }

    /// Delete drawn scrollback rows that the bound has since dropped
    fn drop_evicted(&mut self, evicted: u64, region: &mut dyn DisplayRegion) {
        let stale = evicted.saturating_sub(self.first_row).min(self.scrollback_len as u64) as usize;
        if stale == 0 {
            return;
        }
        region.replace_lines(0, stale, &[]);
        self.lines.drain(..stale);
        self.scrollback_len -= stale;
        self.first_row += stale as u64;
    }

    /// The document as last drawn
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// A row as a display line: trailing blanks trimmed, padded out to the
/// cursor when it sits past the text, marked when soft-wrapped
fn format_row(row: &RenderRow, cursor_col: Option<usize>) -> String {
    let text = row.text();
    let mut line = text.trim_end_matches(' ').to_string();
    if let Some(col) = cursor_col {
        let len = line.chars().count();
        if col > len {
            line.extend(std::iter::repeat(' ').take(col - len));
        }
    }
    if row.wrapped {
        line.push_str(CONTINUATION);
    }
    line
}

/// Character offset of grid column `col` in a row's text
fn char_offset(text: &str, col: usize) -> usize {
    let mut width = 0;
    for (i, ch) in text.chars().enumerate() {
        if width >= col {
            return i;
        }
        width += ch.width().unwrap_or(0);
    }
    text.chars().count() + col.saturating_sub(width)
}

/// One contiguous replacement: old lines `start..end` become new lines
/// `new_start..new_end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineEdit {
    start: usize,
    end: usize,
    new_start: usize,
    new_end: usize,
}

/// Index-aligned diff. Only the tail edit changes the line count, so the
/// edits can be applied in order.
fn diff_lines(old: &[String], new: &[String]) -> Vec<LineEdit> {
    let common = old.len().min(new.len());
    let mut edits = Vec::new();
    let mut i = 0;

    while i < common {
        if old[i] == new[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < common && old[i] != new[i] {
            i += 1;
        }
        edits.push(LineEdit {
            start,
            end: i,
            new_start: start,
            new_end: i,
        });
    }

    if old.len() != new.len() {
        match edits.last_mut() {
            Some(last) if last.end == common => {
                last.end = old.len();
                last.new_end = new.len();
            }
            _ => edits.push(LineEdit {
                start: common,
                end: old.len(),
                new_start: common,
                new_end: new.len(),
            }),
        }
    }

    edits
}

/// In-memory display region
#[derive(Debug, Clone)]
pub struct TextBuffer {
    lines: Vec<String>,
    cursor: (usize, usize),
    viewport_top: usize,
    viewport_height: usize,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new(24)
    }
}

impl TextBuffer {
    pub fn new(viewport_height: usize) -> Self {
        Self {
            lines: Vec::new(),
            cursor: (0, 0),
            viewport_top: 0,
            viewport_height: viewport_height.max(1),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whole buffer text, lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn viewport_top(&self) -> usize {
        self.viewport_top
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
    }

    /// Scroll the view by `delta` lines (negative is up)
    pub fn scroll_by(&mut self, delta: isize) {
        let max_top = self.lines.len().saturating_sub(self.viewport_height);
        let top = self.viewport_top as isize + delta;
        self.viewport_top = top.clamp(0, max_top as isize) as usize;
    }

    /// Lines inside the viewport
    pub fn visible_lines(&self) -> &[String] {
        let start = self.viewport_top.min(self.lines.len());
        let end = (start + self.viewport_height).min(self.lines.len());
        &self.lines[start..end]
    }
}

impl DisplayRegion for TextBuffer {
    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn replace_lines(&mut self, start: usize, end: usize, lines: &[String]) {
        let end = end.min(self.lines.len());
        let start = start.min(end);
        self.lines.splice(start..end, lines.iter().cloned());
    }

    fn set_cursor(&mut self, line: usize, col: usize) {
        self.cursor = (line, col);
    }

    fn viewport_bottom(&self) -> usize {
        self.viewport_top + self.viewport_height - 1
    }

    fn scroll_to_line(&mut self, line: usize) {
        if line < self.viewport_top {
            self.viewport_top = line;
        } else if line >= self.viewport_top + self.viewport_height {
            self.viewport_top = line + 1 - self.viewport_height;
        }
    }
}
