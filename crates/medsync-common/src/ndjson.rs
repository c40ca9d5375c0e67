//! Incremental newline framing for streamed bodies
//!
//! HTTP chunks and file reads split text at arbitrary byte offsets, including
//! the middle of a multi-byte character. [`LineBuffer`] splits on `\n` at the
//! byte level and only decodes complete lines, carrying the trailing partial
//! line over to the next push. [`LineBuffer::finish`] flushes whatever is left
//! once the stream ends.

use crate::error::{MedsyncError, Result};
use crate::text::decode_text;
use crate::types::StreamFrame;

/// Longest line held before the stream is considered malformed
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Byte-level line splitter that keeps the unterminated tail between reads
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Append a chunk and return every line it completes, without terminators
    ///
    /// Fails once a single line grows past the configured maximum; the
    /// offending bytes are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            self.hold(&rest[..newline])?;
            let line = std::mem::take(&mut self.pending);
            lines.push(decode_text(line.strip_suffix(b"\r").unwrap_or(&line)));
            rest = &rest[newline + 1..];
        }
        self.hold(rest)?;
        Ok(lines)
    }

    fn hold(&mut self, bytes: &[u8]) -> Result<()> {
        if self.pending.len() + bytes.len() > self.max_line {
            self.pending.clear();
            return Err(MedsyncError::Protocol(format!(
                "line longer than {} bytes",
                self.max_line
            )));
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    /// Flush the final unterminated line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_text(rest.strip_suffix(b"\r").unwrap_or(&rest)))
    }

    /// Bytes currently held for an unterminated line
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Turns a chunked NDJSON body into protocol frames
///
/// Lines that do not parse as a frame are framing artifacts and are dropped.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    lines: LineBuffer,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamFrame>> {
        Ok(self
            .lines
            .push(chunk)?
            .iter()
            .filter_map(|line| StreamFrame::parse_line(line))
            .collect())
    }

    pub fn finish(&mut self) -> Option<StreamFrame> {
        self.lines
            .finish()
            .and_then(|line| StreamFrame::parse_line(&line))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_is_carried_over() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"FECHA|IDP").unwrap().is_empty());
        assert_eq!(buffer.pending_len(), 9);
        assert_eq!(buffer.push(b"CTE\n2024/01/02|").unwrap(), vec!["FECHA|IDPCTE"]);
        assert_eq!(buffer.push(b"77\r\n").unwrap(), vec!["2024/01/02|77"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "{\"status\":\"Validando códigos\"}\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..split]).unwrap().is_empty());
        let lines = buffer.push(&text[split..]).unwrap();
        assert_eq!(lines, vec!["{\"status\":\"Validando códigos\"}"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"a\nb").unwrap();
        assert_eq!(buffer.finish().as_deref(), Some("b"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_blank_lines_are_preserved_in_order() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\n\nb\n").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_decoder_skips_garbage_and_keeps_frames() {
        let mut decoder = NdjsonDecoder::new();
        let frames = decoder.push(b"{\"status\":\"Leyendo\",\"pct\":5}\nnot json\n{\"status\":\"Car").unwrap();
        assert_eq!(frames, vec![StreamFrame::progress("Leyendo", Some(5))]);

        let frames = decoder.push(b"gando\",\"pct\":60}\n{\"phase\":\"error\",\"error\":\"x\"}").unwrap();
        assert_eq!(frames, vec![StreamFrame::progress("Cargando", Some(60))]);
        assert_eq!(decoder.finish(), Some(StreamFrame::error("x")));
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let mut buffer = LineBuffer::with_max_line(8);
        assert_eq!(buffer.push(b"1234\n12345").unwrap(), vec!["1234"]);

        let err = buffer.push(b"6789").unwrap_err();
        assert!(matches!(err, MedsyncError::Protocol(_)));
        assert_eq!(buffer.pending_len(), 0);

        // A single chunk holding a complete but oversized line fails too
        let mut buffer = LineBuffer::with_max_line(8);
        assert!(buffer.push(b"0123456789\nok\n").is_err());
    }
}
