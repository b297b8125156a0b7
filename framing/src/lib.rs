//! `Content-Length` framing for the LSP wire protocol.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over a byte stream.
//! [`FrameBuffer`] is a push-based state machine: callers feed it whatever
//! chunks the transport produced and get back every payload that is complete
//! so far. Partial data stays buffered until a later `feed`. [`encode`] is the
//! writing side.

/// Maximum frame size (16 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Header/body separator on the wire.
const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Incremental decoder for `Content-Length`-framed payloads.
///
/// A message is emitted only once its full declared byte length has arrived.
/// Header blocks without a usable `Content-Length` are discarded and scanning
/// resumes at the next block; the stream is never poisoned by one bad header.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every payload that is now complete.
    ///
    /// Chunk boundaries are irrelevant: splitting the same bytes differently
    /// across `feed` calls yields the same payloads in the same order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            let Some(sep) = find_separator(&self.buf) else {
                // No complete header block yet — wait for more data.
                break;
            };
            let body_start = sep + SEPARATOR.len();

            let Some(content_length) = parse_content_length(&self.buf[..sep]) else {
                tracing::warn!("discarding header block without usable Content-Length");
                self.buf.drain(..body_start);
                continue;
            };

            if content_length > MAX_FRAME_BYTES {
                tracing::warn!(
                    "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}; \
                     discarding header block"
                );
                self.buf.drain(..body_start);
                continue;
            }

            if self.buf.len() - body_start < content_length {
                // Body not fully arrived — wait for more data.
                break;
            }

            let payload = self.buf[body_start..body_start + content_length].to_vec();
            self.buf.drain(..body_start + content_length);

            match String::from_utf8(payload) {
                Ok(text) => out.push(text),
                Err(_) => {
                    tracing::warn!("discarding non-UTF-8 frame payload ({content_length} bytes)");
                }
            }
        }
        out
    }

    /// Bytes currently buffered awaiting a complete frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

/// Encode one payload as `Content-Length: <N>\r\n\r\n<payload>`.
///
/// `N` is the UTF-8 byte length of the payload, not its character count.
#[must_use]
pub fn encode(payload: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    frame
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(SEPARATOR.len()).position(|w| w == SEPARATOR)
}

/// Parse a header block for `Content-Length` (case-insensitive).
///
/// Unknown headers are tolerated and ignored. Returns `None` when the field
/// is absent or its value is not a number — callers discard the block.
fn parse_content_length(header_block: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header_block).ok()?;

    let mut content_length = None;
    for line in text.split('\n') {
        let line = line.trim();
        if let Some(colon) = line.find(':') {
            let key = &line[..colon];
            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = line[colon + 1..].trim().parse::<usize>().ok();
            }
        }
    }
    content_length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_json(value: &serde_json::Value) -> (String, Vec<u8>) {
        let payload = serde_json::to_string(value).unwrap();
        let frame = encode(&payload);
        (payload, frame)
    }

    #[test]
    fn test_roundtrip() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file://sketch.ino" }
        });
        let (payload, frame) = encode_json(&msg);

        let mut framer = FrameBuffer::new();
        let out = framer.feed(&frame);
        assert_eq!(out, vec![payload]);
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_multibyte_utf8_counts_bytes() {
        // "é" is 2 bytes in UTF-8; Content-Length must count bytes.
        let payload = r#"{"k":"é"}"#;
        assert_eq!(payload.len(), 10);

        let frame = encode(payload);
        assert!(frame.starts_with(b"Content-Length: 10\r\n\r\n"));

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&frame), vec![payload.to_string()]);
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let payload = r#"{"id":1,"result":"héllo"}"#;
        let frame = encode(payload);

        // Every possible two-way split, including inside the header, inside
        // the separator, and inside the multi-byte character.
        for split in 0..=frame.len() {
            let mut framer = FrameBuffer::new();
            let mut out = framer.feed(&frame[..split]);
            out.extend(framer.feed(&frame[split..]));
            assert_eq!(out, vec![payload.to_string()], "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let payload = r#"{"jsonrpc":"2.0","id":7}"#;
        let frame = encode(payload);

        let mut framer = FrameBuffer::new();
        let mut out = Vec::new();
        for byte in &frame {
            out.extend(framer.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(out, vec![payload.to_string()]);
    }

    #[test]
    fn test_two_messages_in_one_feed() {
        let first = r#"{"id":1}"#;
        let second = r#"{"id":2}"#;
        let mut bytes = encode(first);
        bytes.extend_from_slice(&encode(second));

        let mut framer = FrameBuffer::new();
        let out = framer.feed(&bytes);
        assert_eq!(out, vec![first.to_string(), second.to_string()]);
    }

    #[test]
    fn test_partial_body_stays_buffered() {
        let payload = r#"{"method":"initialized"}"#;
        let frame = encode(payload);
        let cut = frame.len() - 5;

        let mut framer = FrameBuffer::new();
        assert!(framer.feed(&frame[..cut]).is_empty());
        assert!(framer.pending_bytes() > 0);
        assert_eq!(framer.feed(&frame[cut..]), vec![payload.to_string()]);
    }

    #[test]
    fn test_missing_content_length_discarded() {
        // Malformed block produces no output and does not corrupt the
        // following message.
        let mut bytes = b"Content-Type: application/json\r\n\r\n".to_vec();
        let payload = r#"{"id":3}"#;
        bytes.extend_from_slice(&encode(payload));

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&bytes), vec![payload.to_string()]);
    }

    #[test]
    fn test_invalid_content_length_value_discarded() {
        let mut bytes = b"Content-Length: not_a_number\r\n\r\n".to_vec();
        let payload = r#"{"id":4}"#;
        bytes.extend_from_slice(&encode(payload));

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&bytes), vec![payload.to_string()]);
    }

    #[test]
    fn test_case_insensitive_content_length() {
        let payload = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!("content-length: {}\r\n\r\n{payload}", payload.len());

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(frame.as_bytes()), vec![payload.to_string()]);
    }

    #[test]
    fn test_ignores_extra_headers() {
        let payload = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{payload}",
            payload.len(),
        );

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(frame.as_bytes()), vec![payload.to_string()]);
    }

    #[test]
    fn test_oversized_frame_discarded() {
        let mut bytes = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).into_bytes();
        let payload = r#"{"id":5}"#;
        bytes.extend_from_slice(&encode(payload));

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&bytes), vec![payload.to_string()]);
    }

    #[test]
    fn test_non_utf8_payload_discarded() {
        let mut bytes = b"Content-Length: 4\r\n\r\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, 0xfd, 0xfc]);
        let payload = r#"{"id":6}"#;
        bytes.extend_from_slice(&encode(payload));

        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&bytes), vec![payload.to_string()]);
    }

    #[test]
    fn test_empty_feed_yields_nothing() {
        let mut framer = FrameBuffer::new();
        assert!(framer.feed(b"").is_empty());
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_zero_length_payload() {
        let frame = encode("");
        let mut framer = FrameBuffer::new();
        assert_eq!(framer.feed(&frame), vec![String::new()]);
    }

    #[test]
    fn test_encode_has_no_trailing_separator() {
        let frame = encode(r#"{"id":8}"#);
        assert!(!frame.ends_with(b"\r\n"));
    }
}
