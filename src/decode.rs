//! Incremental byte → text → line decoding for one output channel.
//!
//! Output arrives in arbitrary chunks: a multi-byte UTF-8 code point or a
//! `\r\n` pair may be split across two chunks. [`DecodeBuffer`] keeps the
//! carry-over state for both so that lines come out exactly as if the whole
//! stream had been decoded at once.
//!
//! `\n`, `\r` and `\r\n` are each treated as a single line terminator.
//! Invalid UTF-8 sequences decode to U+FFFD.
//!
//! # Layout
//!
//! ```text
//! overflow: [.. text carried over from earlier chunks ..]
//! window:   [.. text decoded from the most recent chunk ..]
//! ```
//!
//! Lines are scanned from `overflow` first (only when it is known to contain
//! a terminator), then from `window`. A window with no terminator is moved
//! into `overflow` so the next chunk decodes into a fresh window.

// Rust guideline compliant 2026-02

use crate::constants::DECODE_WINDOW_CAPACITY;

/// Incremental UTF-8 decoder that carries incomplete code points across chunks.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Leading bytes of a code point whose remaining bytes have not arrived yet.
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with no carried state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, appending complete characters to `out`.
    ///
    /// A trailing incomplete sequence is held back until the next call.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        let joined: Vec<u8>;
        let mut input: &[u8] = if self.carry.is_empty() {
            bytes
        } else {
            self.carry.extend_from_slice(bytes);
            joined = std::mem::take(&mut self.carry);
            &joined
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            self.carry = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush carried bytes at end of stream as a replacement character.
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            out.push(char::REPLACEMENT_CHARACTER);
            self.carry.clear();
        }
    }

    /// Returns `true` if an incomplete code point is being carried.
    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}

/// Per-channel line decoder.
#[derive(Debug)]
pub struct DecodeBuffer {
    decoder: Utf8Decoder,
    /// Text decoded from the latest chunk; `window[window_pos..]` is unread.
    window: String,
    window_pos: usize,
    /// Text carried over from earlier chunks; `overflow[overflow_pos..]` is unread.
    overflow: String,
    overflow_pos: usize,
    /// Set when the unread overflow may contain a terminator.
    overflow_has_terminator: bool,
    /// The last terminator was a `\r` at the end of all available text:
    /// a `\n` arriving next belongs to it.
    skip_lf: bool,
}

impl Default for DecodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            decoder: Utf8Decoder::new(),
            window: String::with_capacity(DECODE_WINDOW_CAPACITY),
            window_pos: 0,
            overflow: String::new(),
            overflow_pos: 0,
            overflow_has_terminator: false,
            skip_lf: false,
        }
    }

    /// Decode another chunk of raw bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.window_pos < self.window.len() {
            self.compact_overflow();
            let pending = &self.window[self.window_pos..];
            if find_terminator(pending).is_some() {
                self.overflow_has_terminator = true;
            }
            self.overflow.push_str(pending);
        }
        self.window.clear();
        self.window_pos = 0;

        self.decoder.decode(bytes, &mut self.window);
        self.consume_skipped_lf();
    }

    /// Try to take the next complete line.
    ///
    /// With `is_final` set the stream is known to be finished: whatever text
    /// remains is returned as one last line (if non-empty). Without it, an
    /// unterminated tail is kept for the next chunk and `None` is returned.
    pub fn try_read_line(&mut self, is_final: bool) -> Option<String> {
        if is_final {
            self.decoder.finish(&mut self.window);
        }
        self.consume_skipped_lf();

        if self.overflow_has_terminator {
            let start = self.overflow_pos;
            if let Some(offset) = find_terminator(&self.overflow[start..]) {
                let end = start + offset;
                let line = self.overflow[start..end].to_string();
                let terminator = self.overflow.as_bytes()[end];
                self.overflow_pos = end + 1;
                self.after_terminator(terminator);
                return Some(line);
            }
            self.overflow_has_terminator = false;
        }

        if let Some(offset) = find_terminator(&self.window[self.window_pos..]) {
            let end = self.window_pos + offset;
            let mut line = self.take_overflow();
            line.push_str(&self.window[self.window_pos..end]);
            let terminator = self.window.as_bytes()[end];
            self.window_pos = end + 1;
            self.after_terminator(terminator);
            return Some(line);
        }

        if is_final {
            let mut line = self.take_overflow();
            line.push_str(&self.window[self.window_pos..]);
            self.window.clear();
            self.window_pos = 0;
            return if line.is_empty() { None } else { Some(line) };
        }

        if self.window_pos < self.window.len() {
            self.compact_overflow();
            self.overflow.push_str(&self.window[self.window_pos..]);
        }
        self.window.clear();
        self.window_pos = 0;
        None
    }

    /// Returns `true` if no decoded or partially decoded text is buffered.
    pub fn is_empty(&self) -> bool {
        self.window_pos >= self.window.len()
            && self.overflow_pos >= self.overflow.len()
            && !self.decoder.has_pending()
    }

    fn after_terminator(&mut self, terminator: u8) {
        if terminator == b'\r' {
            self.skip_lf = true;
            self.consume_skipped_lf();
        }
    }

    /// Drop a `\n` that completes a `\r\n` pair split from its `\r`.
    fn consume_skipped_lf(&mut self) {
        if !self.skip_lf {
            return;
        }
        if self.overflow_pos < self.overflow.len() {
            if self.overflow.as_bytes()[self.overflow_pos] == b'\n' {
                self.overflow_pos += 1;
            }
            self.skip_lf = false;
        } else if self.window_pos < self.window.len() {
            if self.window.as_bytes()[self.window_pos] == b'\n' {
                self.window_pos += 1;
            }
            self.skip_lf = false;
        }
    }

    fn take_overflow(&mut self) -> String {
        let line = if self.overflow_pos == 0 {
            std::mem::take(&mut self.overflow)
        } else {
            let rest = self.overflow[self.overflow_pos..].to_string();
            self.overflow.clear();
            rest
        };
        self.overflow_pos = 0;
        self.overflow_has_terminator = false;
        line
    }

    fn compact_overflow(&mut self) {
        if self.overflow_pos > 0 {
            self.overflow.drain(..self.overflow_pos);
            self.overflow_pos = 0;
        }
    }
}

/// Byte offset of the first `\r` or `\n` in `text`.
fn find_terminator(text: &str) -> Option<usize> {
    text.bytes().position(|b| b == b'\r' || b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut DecodeBuffer, is_final: bool) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = buffer.try_read_line(is_final) {
            lines.push(line);
        }
        lines
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<String> {
        let mut buffer = DecodeBuffer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            buffer.append(chunk);
            lines.extend(drain(&mut buffer, false));
        }
        lines.extend(drain(&mut buffer, true));
        lines
    }

    #[test]
    fn test_utf8_split_code_point() {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        let euro = "€".as_bytes();
        decoder.decode(&euro[..1], &mut out);
        assert!(out.is_empty());
        assert!(decoder.has_pending());
        decoder.decode(&euro[1..], &mut out);
        assert_eq!(out, "€");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_utf8_invalid_byte_replaced() {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        decoder.decode(b"a\xffb", &mut out);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_truncated_at_end_of_stream() {
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        decoder.decode(&"é".as_bytes()[..1], &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, "\u{FFFD}");
    }

    #[test]
    fn test_single_chunk_lines() {
        assert_eq!(decode_chunks(&[b"one\ntwo\nthree"]), ["one", "two", "three"]);
    }

    #[test]
    fn test_all_terminator_styles() {
        assert_eq!(decode_chunks(&[b"a\rb\nc\r\nd"]), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        assert_eq!(decode_chunks(&[b"first\r", b"\nsecond\n"]), ["first", "second"]);
    }

    #[test]
    fn test_cr_then_blank_line_not_swallowed() {
        assert_eq!(decode_chunks(&[b"a\r", b"\n\nb"]), ["a", "", "b"]);
    }

    #[test]
    fn test_lone_cr_at_chunk_end() {
        assert_eq!(decode_chunks(&[b"a\r", b"b\n"]), ["a", "b"]);
    }

    #[test]
    fn test_line_spanning_many_chunks() {
        assert_eq!(decode_chunks(&[b"he", b"ll", b"o wor", b"ld\n"]), ["hello world"]);
    }

    #[test]
    fn test_trailing_terminator_yields_no_empty_line() {
        assert_eq!(decode_chunks(&[b"x\n"]), ["x"]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        assert_eq!(decode_chunks(&[b"\n\nz\n"]), ["", "", "z"]);
    }

    #[test]
    fn test_unread_lines_survive_next_append() {
        let mut buffer = DecodeBuffer::new();
        buffer.append(b"one\ntwo\nthr");
        assert_eq!(buffer.try_read_line(false).as_deref(), Some("one"));
        buffer.append(b"ee\n");
        assert_eq!(drain(&mut buffer, false), ["two", "three"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_line_not_returned_until_final() {
        let mut buffer = DecodeBuffer::new();
        buffer.append(b"partial");
        assert_eq!(buffer.try_read_line(false), None);
        assert_eq!(buffer.try_read_line(true).as_deref(), Some("partial"));
        assert_eq!(buffer.try_read_line(true), None);
    }

    #[test]
    fn test_multibyte_split_inside_line() {
        let text = "naïve café\n".as_bytes();
        for split in 0..text.len() {
            let lines = decode_chunks(&[&text[..split], &text[split..]]);
            assert_eq!(lines, ["naïve café"], "split at {split}");
        }
    }

    #[test]
    fn test_crlf_at_every_split_point() {
        let text = b"ab\r\ncd\r\n\r\nef";
        for split in 0..=text.len() {
            let lines = decode_chunks(&[&text[..split], &text[split..]]);
            assert_eq!(lines, ["ab", "cd", "", "ef"], "split at {split}");
        }
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode_chunks(&[]).is_empty());
        assert!(decode_chunks(&[b""]).is_empty());
    }
}
