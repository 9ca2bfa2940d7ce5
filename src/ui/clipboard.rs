//! Clipboard pass-through helpers
//!
//! The engine never owns the system clipboard. Copy hands the host plain
//! text with continuation markers stripped; paste takes the host's text and
//! frames it for the child. A short history of copied text backs
//! paste-from-history.

use std::collections::VecDeque;

/// Marker appended to soft-wrapped lines in the display region
pub const CONTINUATION: &str = "\u{200b}\u{200c}\u{200b}";

/// Default number of entries kept by [`ClipboardHistory`]
pub const HISTORY_LIMIT: usize = 20;

/// Remove continuation markers so wrapped lines join without a break
pub fn strip_continuation(text: &str) -> String {
    text.replace(&format!("{}\n", CONTINUATION), "")
        .replace(CONTINUATION, "")
}

/// Frame pasted text for the child. With `bracketed` the text is wrapped
/// in the paste markers.
pub fn paste_payload(text: &str, bracketed: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 12);
    if bracketed {
        bytes.extend_from_slice(b"\x1b[200~");
    }
    bytes.extend_from_slice(text.as_bytes());
    if bracketed {
        bytes.extend_from_slice(b"\x1b[201~");
    }
    bytes
}

/// Recently copied text, newest first
#[derive(Debug, Clone)]
pub struct ClipboardHistory {
    entries: VecDeque<String>,
    max_entries: usize,
}

impl Default for ClipboardHistory {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl ClipboardHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Record copied text. Empty text is skipped; a repeat moves to the top.
    pub fn push(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.entries.retain(|e| *e != text);
        self.entries.push_front(text);
        self.entries.truncate(self.max_entries);
    }

    /// Move entry `index` to the top and return it
    pub fn select(&mut self, index: usize) -> Option<&str> {
        let entry = self.entries.remove(index)?;
        self.entries.push_front(entry);
        self.entries.front().map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.front().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_continuation() {
        let text = format!("abcdef{}\nghi\nnext{}", CONTINUATION, CONTINUATION);
        assert_eq!(strip_continuation(&text), "abcdefghi\nnext");
        assert_eq!(strip_continuation("plain\ntext"), "plain\ntext");
    }

    #[test]
    fn test_paste_payload() {
        assert_eq!(paste_payload("ls\n", false), b"ls\n");
        assert_eq!(paste_payload("a\nb", true), b"\x1b[200~a\nb\x1b[201~");
    }

    #[test]
    fn test_history_newest_first_and_dedup() {
        let mut history = ClipboardHistory::new(3);
        history.push("one".into());
        history.push("two".into());
        history.push("one".into());
        history.push(String::new());
        let entries: Vec<&str> = history.entries().collect();
        assert_eq!(entries, vec!["one", "two"]);
    }

    #[test]
    fn test_history_bound() {
        let mut history = ClipboardHistory::new(2);
        for text in ["a", "b", "c"] {
            history.push(text.to_string());
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries().collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[test]
    fn test_history_select_rotates() {
        let mut history = ClipboardHistory::default();
        for text in ["a", "b", "c"] {
            history.push(text.to_string());
        }
        assert_eq!(history.select(2), Some("a"));
        assert_eq!(history.entries().collect::<Vec<_>>(), vec!["a", "c", "b"]);
        assert_eq!(history.latest(), Some("a"));
        assert_eq!(history.select(9), None);
    }
}
