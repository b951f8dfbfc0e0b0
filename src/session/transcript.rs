// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::str;

/// Everything a session printed, with a read cursor.
///
/// Output arrives in arbitrary chunks that may split multi-byte characters; incomplete sequences
/// are held back until the rest arrives.  Invalid bytes are replaced with U+FFFD.  The cursor
/// only moves forward.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    text: String,
    pending: Vec<u8>,
    cursor: usize,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of raw output and returns the text decoded from it.
    pub fn push(&mut self, bytes: &[u8]) -> &str {
        let start = self.text.len();
        self.pending.extend_from_slice(bytes);
        loop {
            match str::from_utf8(&self.pending) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // the prefix was just validated
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        &self.text[start..]
    }

    /// Flushes a trailing incomplete sequence once no more output will arrive.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.text.push(char::REPLACEMENT_CHARACTER);
            self.pending.clear();
        }
    }

    /// The whole transcript.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Output after the cursor.
    pub fn unread(&self) -> &str {
        &self.text[self.cursor..]
    }

    /// Byte offset of the cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor `len` bytes forward, clamped to the end of the transcript and to a
    /// character boundary.
    pub fn consume(&mut self, len: usize) {
        let mut cursor = self.cursor.saturating_add(len).min(self.text.len());
        while !self.text.is_char_boundary(cursor) {
            cursor += 1;
        }
        self.cursor = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_characters_are_reassembled() {
        let mut transcript = Transcript::new();
        let bytes = "PIN für alice:".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert_eq!(transcript.push(&bytes[..split]), "PIN f");
        assert_eq!(transcript.push(&bytes[split..]), "ür alice:");
        assert_eq!(transcript.as_str(), "PIN für alice:");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.push(b"a\xffb"), "a\u{fffd}b");
        transcript.push(b"\xe2\x82");
        transcript.finish();
        assert_eq!(transcript.as_str(), "a\u{fffd}b\u{fffd}");
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut transcript = Transcript::new();
        transcript.push(b"Password: ");
        transcript.consume(4);
        assert_eq!(transcript.unread(), "word: ");
        transcript.consume(100);
        assert_eq!(transcript.unread(), "");
        assert_eq!(transcript.cursor(), 10);
    }
}
