//! Streaming UTF-8 decoding
//!
//! Output arrives from the child in arbitrary chunks, so a character may be
//! split across reads. The decoder keeps the partial sequence between calls.

/// Substituted for malformed input
pub const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Outcome of feeding one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf8Result {
    /// Sequence incomplete, need more bytes
    Pending,
    /// A complete scalar value
    Char(char),
    /// Malformed sequence; emit [`REPLACEMENT_CHAR`]
    Invalid,
}

#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    buffer: [u8; 4],
    len: usize,
    expected: usize,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.expected = 0;
    }

    /// True while a multi-byte sequence is partially buffered
    pub fn is_pending(&self) -> bool {
        self.len > 0
    }

    /// Whether `byte` can continue a pending sequence
    pub fn is_continuation(byte: u8) -> bool {
        byte & 0b1100_0000 == 0b1000_0000
    }

    pub fn feed(&mut self, byte: u8) -> Utf8Result {
        if self.len == 0 {
            let expected = match byte {
                0x00..=0x7F => return Utf8Result::Char(byte as char),
                0xC2..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF4 => 4,
                // Stray continuation, overlong lead (C0/C1) or out of range
                _ => return Utf8Result::Invalid,
            };
            self.buffer[0] = byte;
            self.len = 1;
            self.expected = expected;
            return Utf8Result::Pending;
        }

        if !Self::is_continuation(byte) {
            self.reset();
            return Utf8Result::Invalid;
        }

        self.buffer[self.len] = byte;
        self.len += 1;
        if self.len < self.expected {
            return Utf8Result::Pending;
        }

        let result = match std::str::from_utf8(&self.buffer[..self.len]) {
            Ok(s) => s.chars().next().map_or(Utf8Result::Invalid, Utf8Result::Char),
            Err(_) => Utf8Result::Invalid,
        };
        self.reset();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(b'A'), Utf8Result::Char('A'));
        assert!(!decoder.is_pending());
    }

    #[test]
    fn test_three_byte_sequence() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(0xE4), Utf8Result::Pending);
        assert!(decoder.is_pending());
        assert_eq!(decoder.feed(0xB8), Utf8Result::Pending);
        assert_eq!(decoder.feed(0xAD), Utf8Result::Char('中'));
    }

    #[test]
    fn test_four_byte_sequence() {
        let mut decoder = Utf8Decoder::new();
        for &b in &[0xF0, 0x9F, 0x98] {
            assert_eq!(decoder.feed(b), Utf8Result::Pending);
        }
        assert_eq!(decoder.feed(0x80), Utf8Result::Char('😀'));
    }

    #[test]
    fn test_invalid_lead_byte() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(0xFF), Utf8Result::Invalid);
        assert_eq!(decoder.feed(0x80), Utf8Result::Invalid);
        assert_eq!(decoder.feed(0xC0), Utf8Result::Invalid);
    }

    #[test]
    fn test_broken_continuation_resets() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.feed(0xC3), Utf8Result::Pending);
        assert_eq!(decoder.feed(b'a'), Utf8Result::Invalid);
        assert!(!decoder.is_pending());
        assert_eq!(decoder.feed(b'a'), Utf8Result::Char('a'));
    }

    #[test]
    fn test_surrogate_is_invalid() {
        let mut decoder = Utf8Decoder::new();
        decoder.feed(0xED);
        decoder.feed(0xA0);
        assert_eq!(decoder.feed(0x80), Utf8Result::Invalid);
    }
}
