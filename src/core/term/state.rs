//! Terminal state management
//!
//! This module defines the screen model: the main and alternate cell grids,
//! cursor state, scrollback, attributes and mode flags. The parser drives it;
//! the renderer reads it through [`TerminalState::snapshot`] and
//! [`TerminalState::scrollback_rows`].

use bitflags::bitflags;
use std::collections::VecDeque;
use unicode_width::UnicodeWidthChar;

/// Default number of rows kept in scrollback
pub const DEFAULT_SCROLLBACK: usize = 10_000;

/// Tab stop interval
const TAB_WIDTH: u16 = 8;

/// Out-of-band notifications produced while interpreting output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalEvent {
    /// BEL received in the ground state
    Bell,
    /// OSC 0/1/2 set the window title
    TitleChanged(String),
    /// OSC 52 asked to place text on the clipboard
    ClipboardSet(String),
}

/// Erase extent for ED/EL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseMode {
    /// From the cursor to the end (inclusive)
    ToEnd,
    /// From the start to the cursor (inclusive)
    ToStart,
    /// Everything
    All,
}

impl EraseMode {
    /// Map an ED/EL parameter; unknown values yield `None`
    pub fn from_param(param: u16) -> Option<Self> {
        match param {
            0 => Some(EraseMode::ToEnd),
            1 => Some(EraseMode::ToStart),
            2 | 3 => Some(EraseMode::All),
            _ => None,
        }
    }
}

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub primary_screen: ScreenBuffer,
    pub alternate_screen: ScreenBuffer,
    pub using_alternate: bool,
    pub primary_cursor: CursorState,
    pub alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
    /// Text selection state
    pub selection: Option<Selection>,
    events: Vec<TerminalEvent>,
}

/// Text selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Start position (col, absolute_row) - in buffer coordinates (including scrollback)
    pub start: (u16, usize),
    /// End position (col, absolute_row) - in buffer coordinates (including scrollback)
    pub end: (u16, usize),
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, Some(DEFAULT_SCROLLBACK))
    }

    /// Create a state with an explicit scrollback bound (`None` = unbounded)
    pub fn with_scrollback(cols: u16, rows: u16, scrollback_limit: Option<usize>) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary_screen: ScreenBuffer::new(cols, rows, scrollback_limit),
            alternate_screen: ScreenBuffer::new(cols, rows, Some(0)),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
            selection: None,
            events: Vec::new(),
        }
    }

    pub fn active_screen(&self) -> &ScreenBuffer {
        if self.using_alternate {
            &self.alternate_screen
        } else {
            &self.primary_screen
        }
    }

    pub fn active_screen_mut(&mut self) -> &mut ScreenBuffer {
        if self.using_alternate {
            &mut self.alternate_screen
        } else {
            &mut self.primary_screen
        }
    }

    pub fn active_cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn active_cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    pub(crate) fn push_event(&mut self, event: TerminalEvent) {
        self.events.push(event);
    }

    /// Drain pending out-of-band events
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    /// Full reset (RIS). Size, scrollback and its bound survive.
    pub fn reset(&mut self) {
        let limit = self.primary_screen.scrollback_limit;
        let mut fresh = Self::with_scrollback(self.cols, self.rows, limit);
        std::mem::swap(
            &mut fresh.primary_screen.scrollback,
            &mut self.primary_screen.scrollback,
        );
        fresh.primary_screen.evicted = self.primary_screen.evicted;
        fresh.events = std::mem::take(&mut self.events);
        *self = fresh;
    }

    /// Resize the terminal.
    ///
    /// Rows removed from the main screen go to scrollback from the top; the
    /// alternate screen clips its bottom rows. Columns are clipped or padded
    /// and never re-flowed. Resizing to the current size changes nothing.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.cols && rows == self.rows {
            return;
        }

        let evicted = self.primary_screen.resize(cols, rows, true);
        self.alternate_screen.resize(cols, rows, false);

        self.primary_cursor.shift_up(evicted as u16);

        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);
        self.selection = None;

        let max_col = cols - 1;
        let max_row = rows - 1;
        for cursor in [&mut self.primary_cursor, &mut self.alternate_cursor] {
            cursor.clamp(max_row, max_col);
        }
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining character - append to previous cell
            self.append_to_previous_cell(ch);
            return;
        }

        if self.active_cursor().wrap_pending {
            if self.modes.auto_wrap {
                self.wrap_line();
            } else {
                self.active_cursor_mut().wrap_pending = false;
            }
        }

        let cols = self.cols;

        // A wide character that cannot fit in the last column wraps early
        if width == 2 && self.active_cursor().col + 1 >= cols {
            if cols < 2 {
                return;
            }
            if self.modes.auto_wrap {
                let (row, col) = self.cursor_cell();
                let attrs = self.current_attrs.clone();
                self.active_screen_mut().rows[row].cells[col].clear(&attrs);
                self.wrap_line();
            } else {
                self.active_cursor_mut().col = cols - 2;
            }
        }

        if self.modes.insert_mode {
            self.insert_chars(width);
        }

        let (row, col) = self.cursor_cell();

        // Handle overwriting wide characters
        self.handle_wide_char_overwrite(row, col);
        if width == 2 {
            self.handle_wide_char_overwrite(row, col + 1);
        }

        let attrs = self.current_attrs.clone();
        let screen = self.active_screen_mut();

        screen.rows[row].cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs: attrs.clone(),
        };

        if width == 2 {
            screen.rows[row].cells[col + 1] = Cell::continuation(&attrs);
        }

        // Advance; reaching the right margin defers the wrap to the next character
        let next = col as u16 + width;
        let cursor = self.active_cursor_mut();
        if next >= cols {
            cursor.col = cols - 1;
            cursor.wrap_pending = true;
        } else {
            cursor.col = next;
        }
    }

    /// Soft-wrap: flag the current row and move to the start of the next line
    fn wrap_line(&mut self) {
        let row = self.active_cursor().row as usize;
        self.active_screen_mut().rows[row].wrapped = true;
        self.active_cursor_mut().col = 0;
        self.linefeed_inner(false);
    }

    fn cursor_cell(&self) -> (usize, usize) {
        let cursor = self.active_cursor();
        (cursor.row as usize, cursor.col as usize)
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = self.cursor_cell();
        let wrap_pending = self.active_cursor().wrap_pending;

        let mut target = if wrap_pending {
            Some(col)
        } else {
            col.checked_sub(1)
        };
        let screen = self.active_screen_mut();
        if let Some(t) = target {
            if t > 0 && screen.rows[row].cells[t].is_continuation() {
                target = Some(t - 1);
            }
        }
        if let Some(t) = target {
            screen.rows[row].cells[t].grapheme.push(ch);
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        if col >= cols {
            return;
        }
        let screen = self.active_screen_mut();

        // Overwriting the right half of a wide char
        if col > 0 && screen.rows[row].cells[col].is_continuation() {
            screen.rows[row].cells[col - 1].clear(&attrs);
        }

        // Overwriting the left half of a wide char
        if screen.rows[row].cells[col].width == 2 && col + 1 < cols {
            screen.rows[row].cells[col + 1].clear(&attrs);
        }
    }

    /// Bell - recorded as an event for the host
    pub fn bell(&mut self) {
        self.push_event(TerminalEvent::Bell);
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        let cursor = self.active_cursor_mut();
        cursor.col = 0;
        cursor.wrap_pending = false;
    }

    /// Line feed - move cursor down, scroll if needed
    pub fn linefeed(&mut self) {
        let newline = self.modes.linefeed_newline;
        self.linefeed_inner(newline);
    }

    fn linefeed_inner(&mut self, carriage_return: bool) {
        let cursor_row = self.active_cursor().row;
        let scroll_bottom = self.scroll_region.1;
        let rows = self.rows;

        if cursor_row == scroll_bottom {
            self.scroll_up(1);
        } else if cursor_row < rows - 1 {
            self.active_cursor_mut().row += 1;
        }

        let cursor = self.active_cursor_mut();
        cursor.wrap_pending = false;
        if carriage_return {
            cursor.col = 0;
        }
    }

    /// Backspace - move cursor left
    pub fn backspace(&mut self) {
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_sub(1);
        cursor.wrap_pending = false;
    }

    /// Horizontal tab
    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = (((cursor.col / TAB_WIDTH) + 1) * TAB_WIDTH).min(cols - 1);
        cursor.wrap_pending = false;
    }

    /// Scroll the scroll region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let to_scrollback = !self.using_alternate && top == 0;
        let n = n.min(bottom - top + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            let removed_row = screen.rows.remove(top as usize);
            if to_scrollback {
                screen.push_to_scrollback(removed_row);
            }
            screen.rows.insert(bottom as usize, Row::new(cols));
        }
    }

    /// Scroll the scroll region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;
        let n = n.min(bottom - top + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(top as usize, Row::new(cols));
        }
    }

    /// Cursor up
    pub fn cursor_up(&mut self, n: u16) {
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
        cursor.wrap_pending = false;
    }

    /// Cursor down
    pub fn cursor_down(&mut self, n: u16) {
        let rows = self.rows;
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_add(n).min(rows - 1);
        cursor.wrap_pending = false;
    }

    /// Cursor forward (right)
    pub fn cursor_forward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_add(n).min(cols - 1);
        cursor.wrap_pending = false;
    }

    /// Cursor backward (left)
    pub fn cursor_backward(&mut self, n: u16) {
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_sub(n);
        cursor.wrap_pending = false;
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let rows = self.rows;
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows - 1);
        cursor.col = col.saturating_sub(1).min(cols - 1);
        cursor.wrap_pending = false;
    }

    /// Set the cursor column only (1-indexed)
    pub fn cursor_column(&mut self, col: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = col.saturating_sub(1).min(cols - 1);
        cursor.wrap_pending = false;
    }

    /// Set the cursor row only (1-indexed)
    pub fn cursor_row(&mut self, row: u16) {
        let rows = self.rows;
        let cursor = self.active_cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows - 1);
        cursor.wrap_pending = false;
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: EraseMode) {
        let cursor_row = self.active_cursor().row as usize;
        let rows = self.rows as usize;
        let attrs = self.current_attrs.clone();

        let range = match mode {
            EraseMode::ToEnd => {
                self.erase_in_line(EraseMode::ToEnd);
                (cursor_row + 1)..rows
            }
            EraseMode::ToStart => {
                self.erase_in_line(EraseMode::ToStart);
                0..cursor_row
            }
            EraseMode::All => 0..rows,
        };

        let screen = self.active_screen_mut();
        for r in range {
            screen.rows[r].clear(&attrs);
        }
        self.active_cursor_mut().wrap_pending = false;
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: EraseMode) {
        let (row, cursor_col) = self.cursor_cell();
        let cols = self.cols as usize;
        let attrs = self.current_attrs.clone();

        let screen = self.active_screen_mut();
        let line = &mut screen.rows[row];
        match mode {
            EraseMode::ToEnd => {
                for cell in &mut line.cells[cursor_col..cols] {
                    cell.clear(&attrs);
                }
                line.wrapped = false;
            }
            EraseMode::ToStart => {
                for cell in &mut line.cells[..=cursor_col] {
                    cell.clear(&attrs);
                }
            }
            EraseMode::All => line.clear(&attrs),
        }
        self.active_cursor_mut().wrap_pending = false;
    }

    /// Insert blank lines at the cursor row, within the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        let cursor_row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - cursor_row + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(cursor_row as usize, Row::new(cols));
        }
        self.carriage_return();
    }

    /// Delete lines at the cursor row, within the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        let cursor_row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if cursor_row < top || cursor_row > bottom {
            return;
        }
        let cols = self.cols;
        let n = n.min(bottom - cursor_row + 1);

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(cursor_row as usize);
            screen.rows.insert(bottom as usize, Row::new(cols));
        }
        self.carriage_return();
    }

    /// Insert blank cells at the cursor, shifting the rest of the line right (ICH)
    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = self.cursor_cell();
        let attrs = self.current_attrs.clone();
        let cells = &mut self.active_screen_mut().rows[row].cells;
        let n = (n as usize).min(cells.len() - col);

        for _ in 0..n {
            cells.pop();
            let mut blank = Cell::default();
            blank.clear(&attrs);
            cells.insert(col, blank);
        }
    }

    /// Delete cells at the cursor, shifting the rest of the line left (DCH)
    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = self.cursor_cell();
        let attrs = self.current_attrs.clone();
        let cells = &mut self.active_screen_mut().rows[row].cells;
        let n = (n as usize).min(cells.len() - col);

        for _ in 0..n {
            cells.remove(col);
            let mut blank = Cell::default();
            blank.clear(&attrs);
            cells.push(blank);
        }
        self.active_cursor_mut().wrap_pending = false;
    }

    /// Blank cells from the cursor without shifting (ECH)
    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = self.cursor_cell();
        let attrs = self.current_attrs.clone();
        let cells = &mut self.active_screen_mut().rows[row].cells;
        let end = (col + n as usize).min(cells.len());

        for cell in &mut cells[col..end] {
            cell.clear(&attrs);
        }
    }

    /// Set scroll region (1-indexed, inclusive)
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let rows = self.rows;
        let top = top.saturating_sub(1).min(rows - 1);
        let bottom = bottom.saturating_sub(1).min(rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    /// Save cursor position
    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let cursor = self.active_cursor();
            (cursor.col, cursor.row)
        };
        let attrs = self.current_attrs.clone();
        let saved = SavedCursor { col, row, attrs };
        self.active_cursor_mut().saved = Some(saved);
    }

    /// Restore cursor position
    pub fn restore_cursor(&mut self) {
        let saved = self.active_cursor().saved.clone();
        if let Some(saved) = saved {
            let (max_row, max_col) = (self.rows - 1, self.cols - 1);
            let cursor = self.active_cursor_mut();
            cursor.col = saved.col.min(max_col);
            cursor.row = saved.row.min(max_row);
            cursor.wrap_pending = false;
            self.current_attrs = saved.attrs;
        }
    }

    /// Switch to the alternate screen. The alternate grid starts blank.
    pub fn enter_alternate_screen(&mut self) {
        if self.using_alternate {
            return;
        }
        self.alternate_screen = ScreenBuffer::new(self.cols, self.rows, Some(0));
        self.alternate_cursor = CursorState {
            row: self.primary_cursor.row,
            col: self.primary_cursor.col,
            ..CursorState::default()
        };
        self.using_alternate = true;
        self.scroll_region = (0, self.rows - 1);
        self.selection = None;
    }

    /// Return to the main screen
    pub fn exit_alternate_screen(&mut self) {
        if !self.using_alternate {
            return;
        }
        self.using_alternate = false;
        self.scroll_region = (0, self.rows - 1);
        self.selection = None;
    }

    /// Set private mode (DECSET/DECRST)
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            25 => self.active_cursor_mut().visible = enable,
            66 => self.modes.application_keypad = enable,
            47 | 1047 => {
                if enable {
                    self.enter_alternate_screen();
                } else {
                    self.exit_alternate_screen();
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.enter_alternate_screen();
                    self.alternate_cursor.row = 0;
                    self.alternate_cursor.col = 0;
                } else {
                    self.exit_alternate_screen();
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {
                tracing::debug!(mode, enable, "ignoring unsupported private mode");
            }
        }
    }

    /// Reverse index - cursor up, scroll if at top
    pub fn reverse_index(&mut self) {
        let cursor_row = self.active_cursor().row;
        let scroll_top = self.scroll_region.0;

        if cursor_row == scroll_top {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// Index - cursor down, scroll if at bottom
    pub fn index(&mut self) {
        self.linefeed_inner(false);
    }

    /// Build a renderable view of the active grid
    pub fn snapshot(&self) -> ScreenSnapshot {
        let screen = self.active_screen();
        let cursor = self.active_cursor();
        ScreenSnapshot {
            rows: screen.rows.iter().map(Row::to_render_row).collect(),
            cursor: CursorPosition {
                row: cursor.row,
                col: cursor.col,
                visible: cursor.visible,
            },
            alternate: self.using_alternate,
            modes: self.modes.clone(),
            title: self.title.clone(),
            scrollback_total: self.primary_screen.scrollback_total(),
            scrollback_evicted: self.primary_screen.evicted,
        }
    }

    /// Main-screen scrollback rows whose absolute index is `>= from`.
    ///
    /// Absolute indices count every row ever pushed; rows dropped by the
    /// scrollback bound are simply absent.
    pub fn scrollback_rows(&self, from: u64) -> Vec<RenderRow> {
        let screen = &self.primary_screen;
        let skip = from.saturating_sub(screen.evicted) as usize;
        screen
            .scrollback
            .iter()
            .skip(skip)
            .map(Row::to_render_row)
            .collect()
    }

    /// Text of the cursor's line (trailing blanks trimmed) and the cursor's
    /// character offset within it
    pub fn cursor_line(&self) -> (String, usize) {
        let (row, col) = self.cursor_cell();
        let line = &self.active_screen().rows[row];
        let mut offset = 0;
        let mut text = String::new();
        for (i, cell) in line.cells.iter().enumerate() {
            if i == col {
                offset = text.chars().count();
            }
            if !cell.is_continuation() {
                text.push_str(cell.display_char());
            }
        }
        let trimmed = text.trim_end_matches(' ').to_string();
        (trimmed, offset)
    }

    /// Start text selection (screen coordinates)
    pub fn start_selection(&mut self, col: u16, row: u16) {
        let abs_row = self.active_screen().screen_to_buffer_row(row as usize);
        self.selection = Some(Selection {
            start: (col, abs_row),
            end: (col, abs_row),
        });
    }

    /// Update selection end point (screen coordinates)
    pub fn update_selection(&mut self, col: u16, row: u16) {
        let abs_row = self.active_screen().screen_to_buffer_row(row as usize);
        if let Some(ref mut sel) = self.selection {
            sel.end = (col, abs_row);
        }
    }

    /// Clear selection
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Normalize selection so start is before end
    fn normalize_selection(sel: &Selection) -> ((u16, usize), (u16, usize)) {
        let start = sel.start;
        let end = sel.end;

        if start.1 < end.1 || (start.1 == end.1 && start.0 <= end.0) {
            (start, end)
        } else {
            (end, start)
        }
    }

    /// Get selected text. Soft-wrapped rows join without a line break.
    pub fn get_selected_text(&self) -> Option<String> {
        let sel = self.selection.as_ref()?;
        let (start, end) = Self::normalize_selection(sel);

        let screen = self.active_screen();
        let mut result = String::new();

        for abs_row in start.1..=end.1 {
            let row = match screen.get_row_absolute(abs_row) {
                Some(r) => r,
                None => continue,
            };

            let col_start = if abs_row == start.1 { start.0 as usize } else { 0 };
            let col_end = if abs_row == end.1 {
                end.0 as usize + 1
            } else {
                row.cells.len()
            };

            for cell in row.cells.iter().take(col_end).skip(col_start) {
                if !cell.is_continuation() {
                    result.push_str(cell.display_char());
                }
            }

            if abs_row < end.1 && !row.wrapped {
                while result.ends_with(' ') {
                    result.pop();
                }
                result.push('\n');
            }
        }

        while result.ends_with(' ') {
            result.pop();
        }

        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

/// Screen buffer with scrollback
pub struct ScreenBuffer {
    /// Visible rows
    pub rows: Vec<Row>,
    /// Scrollback history, oldest first
    pub scrollback: VecDeque<Row>,
    /// Maximum scrollback lines (`None` = unbounded)
    pub scrollback_limit: Option<usize>,
    /// Rows dropped from the front of scrollback by the bound
    pub evicted: u64,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16, scrollback_limit: Option<usize>) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            evicted: 0,
        }
    }

    /// Resize to `new_cols`×`new_rows`. Returns how many top rows were moved
    /// to scrollback (only when `evict_to_scrollback` is set).
    pub fn resize(&mut self, new_cols: u16, new_rows: u16, evict_to_scrollback: bool) -> usize {
        let new_rows = new_rows as usize;
        let mut evicted = 0;

        if self.rows.len() > new_rows {
            let excess = self.rows.len() - new_rows;
            if evict_to_scrollback {
                let moved: Vec<Row> = self.rows.drain(..excess).collect();
                for row in moved {
                    self.push_to_scrollback(row);
                }
                evicted = excess;
            } else {
                self.rows.truncate(new_rows);
            }
        }
        while self.rows.len() < new_rows {
            self.rows.push(Row::new(new_cols));
        }

        for row in &mut self.rows {
            row.resize(new_cols);
        }

        evicted
    }

    /// Add a row to scrollback when scrolling up
    pub fn push_to_scrollback(&mut self, row: Row) {
        if self.scrollback_limit == Some(0) {
            self.evicted += 1;
            return;
        }
        self.scrollback.push_back(row);
        if let Some(limit) = self.scrollback_limit {
            while self.scrollback.len() > limit {
                self.scrollback.pop_front();
                self.evicted += 1;
            }
        }
    }

    /// Every row ever pushed to scrollback, including evicted ones
    pub fn scrollback_total(&self) -> u64 {
        self.evicted + self.scrollback.len() as u64
    }

    /// Get the total number of lines (scrollback + visible)
    pub fn total_lines(&self) -> usize {
        self.scrollback.len() + self.rows.len()
    }

    /// Convert screen row to absolute buffer row
    pub fn screen_to_buffer_row(&self, screen_row: usize) -> usize {
        self.scrollback.len() + screen_row
    }

    /// Get a row by absolute buffer position (0 = oldest retained scrollback line)
    pub fn get_row_absolute(&self, abs_row: usize) -> Option<&Row> {
        let total_scrollback = self.scrollback.len();
        if abs_row < total_scrollback {
            self.scrollback.get(abs_row)
        } else {
            self.rows.get(abs_row - total_scrollback)
        }
    }
}

/// A single row
#[derive(Clone, Debug)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Produced by soft-wrap: the logical line continues on the next row
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, new_cols: u16) {
        let new_cols = new_cols as usize;
        self.cells.resize(new_cols, Cell::default());
        // A wide char cut in half by the new margin becomes a blank
        if let Some(last) = self.cells.last_mut() {
            if last.width == 2 {
                *last = Cell::default();
            }
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
    }

    /// Group cells into runs of equal attributes
    pub fn to_render_row(&self) -> RenderRow {
        let mut runs: Vec<TextRun> = Vec::new();
        for cell in self.cells.iter().filter(|c| !c.is_continuation()) {
            match runs.last_mut() {
                Some(run) if run.attrs == cell.attrs => run.text.push_str(cell.display_char()),
                _ => runs.push(TextRun {
                    text: cell.display_char().to_string(),
                    attrs: cell.attrs.clone(),
                }),
            }
        }
        RenderRow {
            runs,
            wrapped: self.wrapped,
        }
    }
}

/// A single cell
#[derive(Clone, Debug)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn clear(&mut self, attrs: &CellAttrs) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = attrs.clone();
    }

    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: attrs.clone(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Get the display character (space if empty)
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// Cell attributes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Color definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    /// Convert to crossterm color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        match self {
            Color::Default => crossterm::style::Color::Reset,
            Color::Indexed(n) => crossterm::style::Color::AnsiValue(n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb { r, g, b },
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Cursor shape
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorShape {
    /// Default (host dependent)
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorShape {
    /// Create from DECSCUSR parameter
    pub fn from_decscusr(n: u16) -> Self {
        match n {
            1 => CursorShape::BlinkingBlock,
            2 => CursorShape::SteadyBlock,
            3 => CursorShape::BlinkingUnderline,
            4 => CursorShape::SteadyUnderline,
            5 => CursorShape::BlinkingBar,
            6 => CursorShape::SteadyBar,
            _ => CursorShape::Default,
        }
    }
}

/// Cursor state
#[derive(Clone, Debug)]
pub struct CursorState {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub shape: CursorShape,
    /// The last column was written; the next printable wraps first
    pub wrap_pending: bool,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            shape: CursorShape::Default,
            wrap_pending: false,
            saved: None,
        }
    }
}

impl CursorState {
    fn clamp(&mut self, max_row: u16, max_col: u16) {
        self.row = self.row.min(max_row);
        self.col = self.col.min(max_col);
        self.wrap_pending = false;
        if let Some(saved) = self.saved.as_mut() {
            saved.row = saved.row.min(max_row);
            saved.col = saved.col.min(max_col);
        }
    }

    fn shift_up(&mut self, n: u16) {
        self.row = self.row.saturating_sub(n);
        if let Some(saved) = self.saved.as_mut() {
            saved.row = saved.row.saturating_sub(n);
        }
    }
}

/// Saved cursor state
#[derive(Clone, Debug)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
}

/// Terminal modes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub application_keypad: bool,
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            application_keypad: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
            bracketed_paste: false,
        }
    }
}

/// A run of text sharing one set of attributes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub attrs: CellAttrs,
}

/// One grid row as the renderer sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderRow {
    pub runs: Vec<TextRun>,
    /// Soft-wrapped into the next row
    pub wrapped: bool,
}

impl RenderRow {
    /// Full row text, one char per cell (wide chars once)
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// Cursor position reported with a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorPosition {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
}

/// Immutable copy of the active grid handed to the presentation side
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub rows: Vec<RenderRow>,
    pub cursor: CursorPosition,
    pub alternate: bool,
    pub modes: TerminalModes,
    pub title: String,
    /// Rows ever pushed to main-screen scrollback
    pub scrollback_total: u64,
    /// Rows dropped from the front of scrollback by the bound
    pub scrollback_evicted: u64,
}

impl ScreenSnapshot {
    /// Row texts, for assertions and plain-text hosts
    pub fn lines(&self) -> Vec<String> {
        self.rows.iter().map(RenderRow::text).collect()
    }
}
