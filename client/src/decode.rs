//! Incremental UTF-8 decoding over transport-determined chunk boundaries.
//!
//! The streaming chat endpoint delivers an unframed byte stream: chunk
//! boundaries are decided by the transport, not the content, so a multi-byte
//! character can be split across two reads. The decoder holds the incomplete
//! tail of each chunk and prepends it to the next one, so callers always see
//! whole characters in arrival order.

/// Stateful chunk-to-text decoder.
///
/// Invalid interior byte sequences decode to `U+FFFD` immediately; an
/// incomplete trailing sequence is held until more bytes arrive or the
/// stream ends ([`ChunkDecoder::finish`]).
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one network chunk into a text fragment.
    ///
    /// Returns an empty string when the chunk completes no character (for
    /// example, the first byte of a split multi-byte sequence).
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(chunk);

        let mut out = String::new();
        let mut rest: &[u8] = &buffer;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(prefix) = std::str::from_utf8(valid) {
                        out.push_str(prefix);
                    }
                    rest = after;

                    match e.error_len() {
                        // Invalid sequence of a known length: substitute and
                        // keep decoding the remainder.
                        Some(len) => {
                            out.push('\u{FFFD}');
                            rest = &rest[len..];
                        }
                        // Incomplete trailing sequence: hold it for the next
                        // chunk.
                        None => break,
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush at stream end.
    ///
    /// Any bytes still held are a truncated multi-byte character; they
    /// surface as replacement characters rather than being dropped.
    pub fn finish(self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(&self.pending).into_owned()
        }
    }

    /// True when no partial character is buffered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.pending.is_empty()
    }
}
