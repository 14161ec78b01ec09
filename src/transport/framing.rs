//! Framing for the stdio side of the bridge.
//!
//! Clients talk to the bridge in one of two conventions, and the bridge
//! answers in whichever one it saw first.
//!
//! # Wire Formats
//!
//! Header-framed (same as LSP):
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header block ends at the first `\r\n\r\n` or `\n\n`. The key is
//! matched case-insensitively and additional header lines are ignored.
//!
//! Plain: newline-delimited JSON objects, or a single bare JSON object
//! spanning the whole available input.
//!
//! [`FrameBuffer`] accumulates bytes and hands out complete message bodies.
//! [`encode_message`] produces outbound bytes for a given [`ResponseMode`].

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::debug;

/// Header key carrying the body length.
const CONTENT_LENGTH: &str = "Content-Length";

/// Number of bytes shown by [`preview`].
const PREVIEW_LIMIT: usize = 200;

/// Unrecoverable framing failures.
///
/// Once a header block has been seen without a usable length, frame
/// boundaries are unknown for the rest of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Header block terminated but contained no `Content-Length` line.
    #[error("missing Content-Length in header block {header:?}")]
    MissingContentLength {
        /// The offending header block.
        header: String,
    },

    /// `Content-Length` present but not a non-negative decimal integer.
    #[error("invalid Content-Length value {value:?}")]
    InvalidContentLength {
        /// The raw header value.
        value: String,
    },
}

// =============================================================================
// Response Mode
// =============================================================================

/// Framing convention used for everything written back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Nothing extracted yet. Writes fall back to header framing.
    #[default]
    Unset,
    /// `Content-Length` framed.
    HeaderFramed,
    /// One JSON document per line.
    LineDelimited,
}

impl ResponseMode {
    /// Adopt `detected` if no mode has been settled yet.
    ///
    /// Returns `true` when this call settled the mode.
    pub fn settle(&mut self, detected: ResponseMode) -> bool {
        if *self == ResponseMode::Unset && detected != ResponseMode::Unset {
            *self = detected;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Result of probing the input buffer once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A complete header-framed message is available.
    Header {
        /// Offset of the body (header block plus separator).
        body_start: usize,
        /// Declared body length.
        body_len: usize,
    },
    /// A header block is present but the body is still short by `needed` bytes.
    Incomplete {
        /// Bytes still missing.
        needed: usize,
    },
    /// No header block; the buffer holds newline-delimited JSON.
    Lines,
    /// No header block; the buffer holds a single bare JSON object.
    Bare,
    /// Nothing usable yet.
    NeedMore,
}

/// Probe `buf` for the next extractable unit.
///
/// Header framing wins whenever a blank-line separator is present. Only in
/// its absence are newline-delimited and bare JSON considered.
///
/// # Errors
///
/// Returns a [`FramingError`] when a header block is present but carries no
/// valid `Content-Length`.
pub fn detect_frame(buf: &[u8]) -> Result<Detection, FramingError> {
    if let Some((header_end, separator_len)) = find_header_end(buf) {
        let header = String::from_utf8_lossy(&buf[..header_end]);
        let body_len = parse_content_length(&header)?;
        let body_start = header_end + separator_len;
        let available = buf.len() - body_start;

        if available < body_len {
            return Ok(Detection::Incomplete {
                needed: body_len - available,
            });
        }

        return Ok(Detection::Header {
            body_start,
            body_len,
        });
    }

    let text = String::from_utf8_lossy(buf);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Ok(Detection::NeedMore);
    }
    if trimmed.contains(['\n', '\r']) {
        return Ok(Detection::Lines);
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(Detection::Bare);
    }

    Ok(Detection::NeedMore)
}

/// Locate the end of the first header block.
///
/// Returns the offset where the separator begins and the separator length.
/// Whichever of `\r\n\r\n` and `\n\n` occurs first ends the block, so
/// frames using different conventions can share one read.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = find(buf, b"\r\n\r\n").map(|pos| (pos, 4));
    let lf = find(buf, b"\n\n").map(|pos| (pos, 2));
    match (crlf, lf) {
        (Some(crlf), Some(lf)) => Some(if lf.0 < crlf.0 { lf } else { crlf }),
        (crlf, lf) => crlf.or(lf),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the body length from a header block.
///
/// The first line whose key matches `Content-Length` (case-insensitive)
/// decides; other headers such as `Content-Type` are ignored.
fn parse_content_length(header: &str) -> Result<usize, FramingError> {
    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }

        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FramingError::InvalidContentLength {
                value: value.to_string(),
            });
        }
        return value
            .parse()
            .map_err(|_| FramingError::InvalidContentLength {
                value: value.to_string(),
            });
    }

    Err(FramingError::MissingContentLength {
        header: header.to_string(),
    })
}

// =============================================================================
// Frame Buffer
// =============================================================================

/// Accumulates stdin bytes and yields complete message bodies.
///
/// The buffer only shrinks by whole frames, so a message split across any
/// number of reads comes out intact. The [`ResponseMode`] is settled by the
/// first successful extraction and never changes afterwards.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// Unconsumed input.
    buffer: BytesMut,
    /// Bodies already cut from the buffer but not yet handed out.
    ready: VecDeque<String>,
    /// Sticky output framing.
    mode: ResponseMode,
}

impl FrameBuffer {
    /// Create an empty buffer with no settled mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly arrived bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        debug!(
            "buffer {} bytes: {}",
            self.buffer.len(),
            preview(&self.buffer)
        );
    }

    /// Take the next complete message body, if any.
    ///
    /// Returns `Ok(None)` when more input is required; the buffer is left
    /// untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] for a header block without a valid
    /// `Content-Length`. The stream cannot be resynchronised after that.
    pub fn next_message(&mut self) -> Result<Option<String>, FramingError> {
        if let Some(message) = self.ready.pop_front() {
            return Ok(Some(message));
        }

        match detect_frame(&self.buffer)? {
            Detection::Header {
                body_start,
                body_len,
            } => {
                debug!(
                    "header {}",
                    escape(&String::from_utf8_lossy(&self.buffer[..body_start]))
                );
                self.buffer.advance(body_start);
                let body = self.buffer.split_to(body_len);
                self.mode.settle(ResponseMode::HeaderFramed);
                let body = String::from_utf8_lossy(&body).into_owned();
                debug!("body {}", preview(body.as_bytes()));
                Ok(Some(body))
            }
            Detection::Incomplete { needed } => {
                debug!("waiting for {} more bytes", needed);
                Ok(None)
            }
            Detection::Lines => {
                let taken = self.buffer.split();
                self.mode.settle(ResponseMode::LineDelimited);
                let text = String::from_utf8_lossy(&taken);
                self.ready.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string),
                );
                Ok(self.ready.pop_front())
            }
            Detection::Bare => {
                let taken = self.buffer.split();
                self.mode.settle(ResponseMode::LineDelimited);
                Ok(Some(String::from_utf8_lossy(&taken).trim().to_string()))
            }
            Detection::NeedMore => {
                if !self.buffer.is_empty() {
                    debug!(
                        "unparsed {} bytes: {}",
                        self.buffer.len(),
                        preview(&self.buffer)
                    );
                }
                Ok(None)
            }
        }
    }

    /// The sticky output framing.
    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Number of unconsumed input bytes, including bodies already split
    /// off but not yet returned by [`FrameBuffer::next_message`].
    pub fn len(&self) -> usize {
        self.buffer.len() + self.ready.iter().map(String::len).sum::<usize>()
    }

    /// Whether no input is pending.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.ready.is_empty()
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Frame `text` for stdout according to `mode`.
///
/// Header framing (also used while the mode is still unset) emits a
/// `Content-Length` equal to the UTF-8 byte length and no trailing newline.
/// Line mode appends a single `\n`.
pub fn encode_message(mode: ResponseMode, text: &str) -> Vec<u8> {
    match mode {
        ResponseMode::LineDelimited => {
            let mut out = Vec::with_capacity(text.len() + 1);
            out.extend_from_slice(text.as_bytes());
            out.push(b'\n');
            out
        }
        ResponseMode::HeaderFramed | ResponseMode::Unset => {
            let header = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, text.len());
            let mut out = Vec::with_capacity(header.len() + text.len());
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(text.as_bytes());
            out
        }
    }
}

/// Printable excerpt of raw input for diagnostics.
pub fn preview(buf: &[u8]) -> String {
    let end = buf.len().min(PREVIEW_LIMIT);
    escape(&String::from_utf8_lossy(&buf[..end]))
}

fn escape(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn framed(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn drain(buffer: &mut FrameBuffer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(message) = buffer.next_message().expect("framing failed") {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_header_frame_in_one_read() {
        let body = r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#;
        let mut buffer = FrameBuffer::new();
        buffer.extend(&framed(body));

        assert_eq!(drain(&mut buffer), vec![body.to_string()]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.mode(), ResponseMode::HeaderFramed);
    }

    #[test]
    fn test_header_frame_one_byte_at_a_time() {
        let body = r#"{"jsonrpc":"2.0","method":"tools/call","id":7,"params":{"name":"readDocument"}}"#;
        let raw = framed(body);
        let mut buffer = FrameBuffer::new();
        let mut out = Vec::new();

        for byte in &raw {
            buffer.extend(std::slice::from_ref(byte));
            out.extend(drain(&mut buffer));
        }

        assert_eq!(out, vec![body.to_string()]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_header_frame_split_at_every_boundary() {
        let body = r#"{"jsonrpc":"2.0","method":"ping","id":"é"}"#;
        let raw = framed(body);

        for split in 1..raw.len() {
            let mut buffer = FrameBuffer::new();
            buffer.extend(&raw[..split]);
            let mut out = drain(&mut buffer);
            buffer.extend(&raw[split..]);
            out.extend(drain(&mut buffer));

            assert_eq!(out, vec![body.to_string()], "split at {}", split);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_partial_body_leaves_buffer_untouched() {
        let raw = b"Content-Length: 10\r\n\r\n{\"a\":";
        let mut buffer = FrameBuffer::new();
        buffer.extend(raw);

        assert_eq!(buffer.next_message(), Ok(None));
        assert_eq!(buffer.len(), raw.len());
        assert_eq!(buffer.mode(), ResponseMode::Unset);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut raw = framed(r#"{"id":1}"#);
        raw.extend(framed(r#"{"id":2}"#));
        raw.extend_from_slice(b"Content-Length: 8\r\n\r\n{\"id\"");

        let mut buffer = FrameBuffer::new();
        buffer.extend(&raw);

        assert_eq!(
            drain(&mut buffer),
            vec![r#"{"id":1}"#.to_string(), r#"{"id":2}"#.to_string()]
        );
        assert_eq!(buffer.len(), "Content-Length: 8\r\n\r\n{\"id\"".len());

        buffer.extend(b":3}");
        assert_eq!(drain(&mut buffer), vec![r#"{"id":3}"#.to_string()]);
    }

    #[test]
    fn test_lf_separator_and_case_insensitive_key() {
        let body = r#"{"test":true}"#;
        let raw = format!(
            "content-type: application/json\ncontent-length: {}\n\n{}",
            body.len(),
            body
        );
        let mut buffer = FrameBuffer::new();
        buffer.extend(raw.as_bytes());

        assert_eq!(drain(&mut buffer), vec![body.to_string()]);
    }

    #[test]
    fn test_zero_length_body_yields_empty_message() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"Content-Length: 0\r\n\r\n");

        assert_eq!(buffer.next_message(), Ok(Some(String::new())));
        assert!(buffer.is_empty());
        assert_eq!(buffer.mode(), ResponseMode::HeaderFramed);
    }

    #[test]
    fn test_missing_content_length_is_fatal() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"Content-Type: application/json\r\n\r\n{}");

        let err = buffer.next_message().unwrap_err();
        assert!(matches!(err, FramingError::MissingContentLength { .. }));
    }

    #[test]
    fn test_invalid_content_length_is_fatal() {
        for value in ["abc", "-5", "+5", "1.5", ""] {
            let raw = format!("Content-Length: {}\r\n\r\n{{}}", value);
            let mut buffer = FrameBuffer::new();
            buffer.extend(raw.as_bytes());

            assert!(
                matches!(
                    buffer.next_message(),
                    Err(FramingError::InvalidContentLength { .. })
                ),
                "value {:?} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_newline_delimited_json() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"{\"id\":1}\r\n   \n{\"id\":2}\n");

        assert_eq!(
            drain(&mut buffer),
            vec![r#"{"id":1}"#.to_string(), r#"{"id":2}"#.to_string()]
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.mode(), ResponseMode::LineDelimited);
    }

    #[test]
    fn test_bare_json_object() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(br#"  {"jsonrpc":"2.0","method":"initialize","id":1}"#);

        assert_eq!(
            drain(&mut buffer),
            vec![r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#.to_string()]
        );
        assert_eq!(buffer.mode(), ResponseMode::LineDelimited);
    }

    #[test]
    fn test_incomplete_bare_json_waits() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(br#"{"jsonrpc":"2.0","#);

        assert_eq!(buffer.next_message(), Ok(None));
        assert_eq!(buffer.len(), 17);

        buffer.extend(br#""id":1}"#);
        assert_eq!(
            buffer.next_message(),
            Ok(Some(r#"{"jsonrpc":"2.0","id":1}"#.to_string()))
        );
    }

    #[test]
    fn test_partial_header_waits() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"Content-Len");

        assert_eq!(buffer.next_message(), Ok(None));
        assert_eq!(buffer.len(), 11);
    }

    #[test]
    fn test_mode_is_sticky() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(br#"{"id":1}"#);
        drain(&mut buffer);
        assert_eq!(buffer.mode(), ResponseMode::LineDelimited);

        buffer.extend(&framed(r#"{"id":2}"#));
        assert_eq!(drain(&mut buffer), vec![r#"{"id":2}"#.to_string()]);
        assert_eq!(buffer.mode(), ResponseMode::LineDelimited);
    }

    #[test]
    fn test_settle_only_once() {
        let mut mode = ResponseMode::Unset;
        assert!(mode.settle(ResponseMode::HeaderFramed));
        assert!(!mode.settle(ResponseMode::LineDelimited));
        assert_eq!(mode, ResponseMode::HeaderFramed);
    }

    #[test]
    fn test_first_content_length_wins() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"Content-Length: 2\r\nContent-Length: 99\r\n\r\n{}");

        assert_eq!(drain(&mut buffer), vec!["{}".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_separators_in_one_read() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"Content-Length: 8\n\n{\"id\":1}Content-Length: 8\r\n\r\n{\"id\":2}");

        assert_eq!(
            drain(&mut buffer),
            vec![r#"{"id":1}"#.to_string(), r#"{"id":2}"#.to_string()]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_len_counts_unreturned_lines() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(b"{\"id\":1}\n{\"id\":2}\n");

        assert_eq!(buffer.next_message(), Ok(Some(r#"{"id":1}"#.to_string())));
        assert_eq!(buffer.len(), r#"{"id":2}"#.len());
        assert!(!buffer.is_empty());

        assert_eq!(buffer.next_message(), Ok(Some(r#"{"id":2}"#.to_string())));
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_crlf_separator_detected() {
        let raw = b"Content-Length: 2\r\n\r\n{}";
        assert_eq!(
            detect_frame(raw),
            Ok(Detection::Header {
                body_start: 21,
                body_len: 2
            })
        );
    }

    #[test]
    fn test_encode_header_framed_uses_byte_length() {
        let text = r#"{"name":"ü"}"#;
        let encoded = encode_message(ResponseMode::HeaderFramed, text);
        let expected = format!("Content-Length: {}\r\n\r\n{}", text.len(), text);

        assert_eq!(String::from_utf8(encoded).unwrap(), expected);
        assert_eq!(text.len(), 13);
    }

    #[test]
    fn test_encode_unset_defaults_to_header() {
        assert_eq!(
            encode_message(ResponseMode::Unset, "{}"),
            b"Content-Length: 2\r\n\r\n{}".to_vec()
        );
    }

    #[test]
    fn test_encode_line_delimited() {
        assert_eq!(
            encode_message(ResponseMode::LineDelimited, "{}"),
            b"{}\n".to_vec()
        );
    }

    #[test]
    fn test_preview_escapes_and_truncates() {
        assert_eq!(preview(b"a\r\nb"), "a\\r\\nb");
        assert_eq!(preview(&[b'x'; 500]).len(), PREVIEW_LIMIT);
    }
}
