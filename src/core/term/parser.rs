//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and updates terminal state. The parser
//! is resumable at any byte boundary: partial escape sequences and partial
//! UTF-8 characters are carried over to the next call.

use base64::{engine::general_purpose, Engine as _};

use super::state::{AttrFlags, Color, CursorShape, EraseMode, TerminalEvent, TerminalState};
use super::utf8::{Utf8Decoder, Utf8Result, REPLACEMENT_CHAR};

/// Parameters beyond this count are dropped
const MAX_PARAMS: usize = 32;

/// OSC payloads beyond this size are discarded
const MAX_OSC_LEN: usize = 1 << 20;

/// Response that needs to be sent back to the PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Status report: terminal OK
    StatusOk,
    /// Device attributes response
    DeviceAttributes,
    /// Secondary device attributes response
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT220 response
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    /// Parallel to `params`: the value followed a ':' separator
    subparams: Vec<bool>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    colon_pending: bool,
    osc_bytes: Vec<u8>,
    osc_overflow: bool,
    utf8: Utf8Decoder,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    /// Malformed CSI; swallow bytes until a final byte
    CsiIgnore,
    OscString,
    /// ESC received within OSC, waiting for backslash
    EscapeInOsc,
    /// DCS, SOS, PM or APC body; ignored until ST
    IgnoreString,
    EscapeInIgnore,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            subparams: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            colon_pending: false,
            osc_bytes: Vec::new(),
            osc_overflow: false,
            utf8: Utf8Decoder::new(),
        }
    }

    /// Feed a chunk of output, collecting any replies owed to the child
    pub fn advance(&mut self, bytes: &[u8], state: &mut TerminalState) -> Vec<Response> {
        bytes
            .iter()
            .filter_map(|&byte| self.feed(byte, state))
            .collect()
    }

    /// Feed a single byte to the parser
    pub fn feed(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        // A character cut short by anything but a continuation byte
        if self.utf8.is_pending() && !Utf8Decoder::is_continuation(byte) {
            self.utf8.reset();
            state.put_char(REPLACEMENT_CHAR);
        }

        // CAN and SUB abort any sequence in progress
        if byte == 0x18 || byte == 0x1A {
            self.state = ParserState::Ground;
            return None;
        }

        match self.state {
            ParserState::OscString => return self.osc_string_state(byte, state),
            ParserState::EscapeInOsc => return self.escape_in_osc(byte, state),
            ParserState::IgnoreString => {
                if byte == 0x1B {
                    self.state = ParserState::EscapeInIgnore;
                }
                return None;
            }
            ParserState::EscapeInIgnore => return self.escape_in_ignore(byte, state),
            _ => {}
        }

        // C0 controls execute in place, even inside a sequence
        if byte < 0x20 {
            match byte {
                0x1B => self.enter_escape(),
                0x07 => state.bell(),
                0x08 => state.backspace(),
                0x09 => state.horizontal_tab(),
                0x0A..=0x0C => state.linefeed(),
                0x0D => state.carriage_return(),
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => self.ground(byte, state),
            ParserState::Escape => self.escape(byte, state),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte),
            ParserState::CsiEntry => self.csi_entry(byte, state),
            ParserState::CsiParam => self.csi_param(byte, state),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, state),
            ParserState::CsiIgnore => {
                if (0x40..=0x7E).contains(&byte) {
                    self.state = ParserState::Ground;
                }
                None
            }
            // Handled above
            ParserState::OscString
            | ParserState::EscapeInOsc
            | ParserState::IgnoreString
            | ParserState::EscapeInIgnore => None,
        }
    }

    /// Handle ESC received within OSC sequence
    fn escape_in_osc(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        // ST (ESC \) or any other escape: the OSC is complete either way
        self.execute_osc(state);
        if byte == b'\\' {
            self.state = ParserState::Ground;
            return None;
        }
        self.enter_escape();
        self.escape(byte, state)
    }

    fn escape_in_ignore(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        if byte == b'\\' {
            self.state = ParserState::Ground;
            return None;
        }
        self.enter_escape();
        if byte < 0x20 {
            return None;
        }
        self.escape(byte, state)
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.clear_sequence();
    }

    fn clear_sequence(&mut self) {
        self.params.clear();
        self.subparams.clear();
        self.intermediates.clear();
        self.current_param = None;
        self.colon_pending = false;
    }

    fn ground(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x7E => state.put_char(byte as char),
            0x7F => {}
            _ => match self.utf8.feed(byte) {
                Utf8Result::Pending => {}
                Utf8Result::Char(ch) => state.put_char(ch),
                Utf8Result::Invalid => state.put_char(REPLACEMENT_CHAR),
            },
        }
        None
    }

    fn escape(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        self.state = ParserState::Ground;
        match byte {
            b'[' => {
                self.clear_sequence();
                self.state = ParserState::CsiEntry;
            }
            b']' => {
                self.osc_bytes.clear();
                self.osc_overflow = false;
                self.state = ParserState::OscString;
            }
            // DCS, SOS, PM, APC
            b'P' | b'X' | b'^' | b'_' => self.state = ParserState::IgnoreString,
            // DECSC - Save cursor
            b'7' => state.save_cursor(),
            // DECRC - Restore cursor
            b'8' => state.restore_cursor(),
            // IND - Index
            b'D' => state.index(),
            b'E' => {
                // NEL - Next line
                state.carriage_return();
                state.index();
            }
            // RI - Reverse index
            b'M' => state.reverse_index(),
            // RIS - Full reset
            b'c' => state.reset(),
            // DECKPAM / DECKPNM
            b'=' => state.modes.application_keypad = true,
            b'>' => state.modes.application_keypad = false,
            0x20..=0x2F => {
                // Intermediate bytes
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {
                tracing::debug!("Unknown ESC final: {:?}", byte as char);
            }
        }
        None
    }

    fn escape_intermediate(&mut self, byte: u8) -> Option<Response> {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            // Charset designations and DEC line attributes are ignored
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_entry(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'?' | b'>' | b'!' | b'=' | b'<' => {
                self.intermediates.push(byte);
                None
            }
            _ => {
                self.state = ParserState::CsiParam;
                self.csi_param(byte, state)
            }
        }
    }

    fn push_param(&mut self) {
        let value = self.current_param.take().unwrap_or(0);
        if self.params.len() < MAX_PARAMS {
            self.params.push(value);
            self.subparams.push(self.colon_pending);
        }
    }

    fn csi_param(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            b';' => {
                self.push_param();
                self.colon_pending = false;
            }
            b':' => {
                self.push_param();
                self.colon_pending = true;
            }
            0x20..=0x2F => {
                if self.current_param.is_some() {
                    self.push_param();
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if self.current_param.is_some() || self.colon_pending {
                    self.push_param();
                }
                return self.execute_csi(byte, state);
            }
            _ => {
                // Private markers after parameters
                self.state = ParserState::CsiIgnore;
            }
        }
        None
    }

    fn csi_intermediate(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => return self.execute_csi(byte, state),
            _ => self.state = ParserState::CsiIgnore,
        }
        None
    }

    fn osc_string_state(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x07 => {
                // BEL terminates OSC
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            0x1B => {
                // Could be ST (ESC \)
                self.state = ParserState::EscapeInOsc;
            }
            0x00..=0x1F => {}
            _ => {
                if self.osc_bytes.len() < MAX_OSC_LEN {
                    self.osc_bytes.push(byte);
                } else {
                    self.osc_overflow = true;
                }
            }
        }
        None
    }

    /// First parameter, with 0 and missing both meaning `default`
    fn param_or(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index).copied() {
            None | Some(0) => default,
            Some(n) => n,
        }
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) -> Option<Response> {
        self.state = ParserState::Ground;

        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let has_other = self
            .intermediates
            .iter()
            .any(|b| !matches!(b, b'?' | b'>'));

        if has_other {
            // DECSCUSR (CSI Ps SP q) - Set cursor style
            if final_byte == b'q' && self.intermediates == [b' '] {
                let shape = self.params.first().copied().unwrap_or(0);
                state.active_cursor_mut().shape = CursorShape::from_decscusr(shape);
            } else {
                self.log_unknown_csi(final_byte);
            }
            return None;
        }

        let n = self.param_or(0, 1);

        match (is_private, is_gt, final_byte) {
            // Cursor movement
            (false, false, b'A') => state.cursor_up(n),
            (false, false, b'B') | (false, false, b'e') => state.cursor_down(n),
            (false, false, b'C') | (false, false, b'a') => state.cursor_forward(n),
            (false, false, b'D') => state.cursor_backward(n),
            (false, false, b'E') => {
                // CNL - Cursor Next Line
                state.cursor_down(n);
                state.carriage_return();
            }
            (false, false, b'F') => {
                // CPL - Cursor Previous Line
                state.cursor_up(n);
                state.carriage_return();
            }
            // CHA / HPA - Cursor Character Absolute
            (false, false, b'G') | (false, false, b'`') => state.cursor_column(n),
            (false, false, b'H') | (false, false, b'f') => {
                // CUP - Cursor Position
                state.cursor_position(self.param_or(0, 1), self.param_or(1, 1));
            }
            // VPA - Line Position Absolute
            (false, false, b'd') => state.cursor_row(n),

            // Erase
            (false, false, b'J') | (false, false, b'K') => {
                match EraseMode::from_param(self.params.first().copied().unwrap_or(0)) {
                    Some(mode) if final_byte == b'J' => state.erase_in_display(mode),
                    Some(mode) => state.erase_in_line(mode),
                    None => self.log_unknown_csi(final_byte),
                }
            }

            // Line operations
            (false, false, b'L') => state.insert_lines(n),
            (false, false, b'M') => state.delete_lines(n),

            // Character operations
            (false, false, b'@') => state.insert_chars(n),
            (false, false, b'P') => state.delete_chars(n),
            (false, false, b'X') => state.erase_chars(n),

            // Scroll
            (false, false, b'S') => state.scroll_up(n),
            (false, false, b'T') => state.scroll_down(n),

            // Scroll region
            (false, false, b'r') => {
                let top = self.param_or(0, 1);
                let bottom = self.param_or(1, state.rows);
                state.set_scroll_region(top, bottom);
                state.cursor_position(1, 1);
            }

            // SGR - Select Graphic Rendition
            (false, false, b'm') => self.execute_sgr(state),

            // Save/restore cursor
            (false, false, b's') => state.save_cursor(),
            (false, false, b'u') => state.restore_cursor(),

            // Device Status Report
            (false, false, b'n') => match self.params.first() {
                Some(5) => return Some(Response::StatusOk),
                Some(6) => {
                    let cursor = state.active_cursor();
                    return Some(Response::CursorPosition(cursor.row + 1, cursor.col + 1));
                }
                _ => self.log_unknown_csi(final_byte),
            },

            // Device Attributes
            (false, false, b'c') => {
                if self.params.first().copied().unwrap_or(0) == 0 {
                    return Some(Response::DeviceAttributes);
                }
            }
            (false, true, b'c') => {
                if self.params.first().copied().unwrap_or(0) == 0 {
                    return Some(Response::SecondaryDeviceAttributes);
                }
            }

            // Private modes (DEC)
            (true, false, b'h') | (true, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in &self.params {
                    state.set_private_mode(p, enable);
                }
            }

            // Standard modes
            (false, false, b'h') | (false, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in &self.params {
                    match p {
                        4 => state.modes.insert_mode = enable,
                        20 => state.modes.linefeed_newline = enable,
                        _ => tracing::debug!(mode = p, enable, "ignoring unsupported mode"),
                    }
                }
            }

            _ => self.log_unknown_csi(final_byte),
        }
        None
    }

    fn log_unknown_csi(&self, final_byte: u8) {
        tracing::debug!(
            "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
            self.intermediates,
            self.params,
            final_byte as char
        );
    }

    /// Split parameters into groups: a main value plus any ':' subparameters
    fn sgr_groups(&self) -> Vec<&[u16]> {
        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..=self.params.len() {
            if i == self.params.len() || !self.subparams[i] {
                groups.push(&self.params[start..i]);
                start = i;
            }
        }
        groups
    }

    fn execute_sgr(&self, state: &mut TerminalState) {
        if self.params.is_empty() {
            state.current_attrs.reset();
            return;
        }

        let groups = self.sgr_groups();
        let mut iter = groups.into_iter();
        let attrs = &mut state.current_attrs;

        while let Some(group) = iter.next() {
            let param = group[0];
            match param {
                0 => attrs.reset(),
                1 => attrs.flags |= AttrFlags::BOLD,
                2 => attrs.flags |= AttrFlags::DIM,
                3 => attrs.flags |= AttrFlags::ITALIC,
                4 => {
                    // 4:0 turns underline off; other styles render as underline
                    if group.get(1) == Some(&0) {
                        attrs.flags &= !AttrFlags::UNDERLINE;
                    } else {
                        attrs.flags |= AttrFlags::UNDERLINE;
                    }
                }
                5 | 6 => attrs.flags |= AttrFlags::BLINK,
                7 => attrs.flags |= AttrFlags::INVERSE,
                8 => attrs.flags |= AttrFlags::HIDDEN,
                9 => attrs.flags |= AttrFlags::STRIKETHROUGH,

                21 => attrs.flags |= AttrFlags::UNDERLINE,
                22 => attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => attrs.flags &= !AttrFlags::ITALIC,
                24 => attrs.flags &= !AttrFlags::UNDERLINE,
                25 => attrs.flags &= !AttrFlags::BLINK,
                27 => attrs.flags &= !AttrFlags::INVERSE,
                28 => attrs.flags &= !AttrFlags::HIDDEN,
                29 => attrs.flags &= !AttrFlags::STRIKETHROUGH,

                // Foreground colors (standard)
                30..=37 => attrs.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(group, &mut iter) {
                        attrs.fg = color;
                    }
                }
                39 => attrs.fg = Color::Default,

                // Background colors (standard)
                40..=47 => attrs.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(group, &mut iter) {
                        attrs.bg = color;
                    }
                }
                49 => attrs.bg = Color::Default,

                // Bright foreground
                90..=97 => attrs.fg = Color::Indexed((param - 90 + 8) as u8),
                // Bright background
                100..=107 => attrs.bg = Color::Indexed((param - 100 + 8) as u8),

                _ => {}
            }
        }
    }

    fn execute_osc(&mut self, state: &mut TerminalState) {
        if self.osc_overflow {
            tracing::debug!("Dropping oversized OSC ({} bytes)", self.osc_bytes.len());
            return;
        }
        let payload = String::from_utf8_lossy(&self.osc_bytes).into_owned();

        // Parse OSC: "code;text"
        let Some((code, text)) = payload.split_once(';') else {
            return;
        };

        match code {
            "0" | "1" | "2" => {
                // Set title
                state.title = text.to_string();
                state.push_event(TerminalEvent::TitleChanged(text.to_string()));
            }
            "52" => {
                // Clipboard: "selection;base64"; "?" is a read request and unsupported
                let data = text.split_once(';').map_or(text, |(_, data)| data);
                if data == "?" {
                    return;
                }
                match general_purpose::STANDARD.decode(data) {
                    Ok(bytes) => {
                        let content = String::from_utf8_lossy(&bytes).into_owned();
                        state.push_event(TerminalEvent::ClipboardSet(content));
                    }
                    Err(e) => tracing::debug!("Invalid OSC 52 payload: {}", e),
                }
            }
            _ => tracing::debug!("Unknown OSC: {}", code),
        }
    }
}

/// Decode a 38/48 colour from either the ':' form inside `group` or the
/// ';' form spread over the following groups
fn extended_color<'a, I>(group: &[u16], rest: &mut I) -> Option<Color>
where
    I: Iterator<Item = &'a [u16]>,
{
    if group.len() > 1 {
        return match group[1] {
            5 => group.get(2).map(|&n| Color::Indexed(n as u8)),
            2 => {
                // 38:2:r:g:b or 38:2:colorspace:r:g:b
                let rgb = if group.len() >= 6 { &group[3..6] } else { &group[2..] };
                match rgb {
                    [r, g, b, ..] => Some(Color::Rgb(*r as u8, *g as u8, *b as u8)),
                    _ => None,
                }
            }
            _ => None,
        };
    }

    let mut next = || rest.next().map(|g| g[0]);
    match next()? {
        5 => next().map(|n| Color::Indexed(n as u8)),
        2 => {
            let r = next().unwrap_or(0) as u8;
            let g = next().unwrap_or(0) as u8;
            let b = next().unwrap_or(0) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}
