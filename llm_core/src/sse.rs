//! Server-sent-event framing.
//!
//! [`SseDecoder`] turns an arbitrary byte stream into SSE blocks, tolerating
//! blocks split across network reads and `\r\n` line endings. The provider
//! payload format is handled by [`parse_completion_chunk`].

use serde::Deserialize;

/// One `\n\n`-terminated SSE block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    fn from_block(block: &str) -> Option<Self> {
        let mut frame = SseFrame::default();
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => frame.event = Some(value.to_string()),
                "data" => data_lines.push(value),
                _ => {}
            }
        }
        if frame.event.is_none() && data_lines.is_empty() {
            return None;
        }
        frame.data = data_lines.join("\n");
        Some(frame)
    }
}

/// Incremental SSE block decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every block completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);
        self.decode_pending();
        // A read may end between `\r` and `\n`, so normalise the whole buffer.
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = SseFrame::from_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Move decoded text from `pending` into `buffer`.
    ///
    /// Invalid bytes become U+FFFD; an incomplete sequence at the tail stays
    /// pending for the next read.
    fn decode_pending(&mut self) {
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(s) => {
                    self.buffer.push_str(s);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = consumed + e.valid_up_to();
                    // The prefix up to `valid_up_to` is known to be UTF-8.
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[consumed..valid]));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid + len;
                        }
                        None => {
                            consumed = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    /// Flush a trailing block that was not terminated by a blank line.
    pub fn finish(mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&tail);
        }
        SseFrame::from_block(&self.buffer)
    }
}

/// Marker the OpenAI-compatible APIs send as the last `data:` payload.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parsed provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    Delta(String),
    Done,
}

/// Decode one `data:` payload of a streaming chat completion.
///
/// A chunk without content (role announcement, finish reason) decodes to an
/// empty delta.
pub fn parse_completion_chunk(data: &str) -> Result<CompletionChunk, serde_json::Error> {
    if data.trim() == DONE_MARKER {
        return Ok(CompletionChunk::Done);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default();
    Ok(CompletionChunk::Delta(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_blocks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let frames = decoder.push(b":1}\n\ndata: x\n\n");
        assert_eq!(
            frames,
            vec![
                SseFrame { event: None, data: "{\"a\":1}".into() },
                SseFrame { event: None, data: "x".into() },
            ]
        );
    }

    #[test]
    fn test_decoder_reads_event_and_crlf() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: done\r\ndata: {}\r\n\r\n: keep-alive\n\n");
        assert_eq!(
            frames,
            vec![SseFrame { event: Some("done".into()), data: "{}".into() }]
        );
    }

    #[test]
    fn test_decoder_keeps_split_utf8_sequence() {
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames[0].data, "café");
    }

    #[test]
    fn test_decoder_crlf_split_between_reads() {
        let mut decoder = SseDecoder::new();
        let mut frames = decoder.push(b"data: {\"a\":1}\r\n\r");
        frames.extend(decoder.push(b"\ndata: {\"b\":2}\r\n\r\n"));
        assert_eq!(
            frames,
            vec![
                SseFrame { event: None, data: "{\"a\":1}".into() },
                SseFrame { event: None, data: "{\"b\":2}".into() },
            ]
        );
    }

    #[test]
    fn test_decoder_invalid_byte_before_split_sequence() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: \xFFcaf\xC3").is_empty());
        let frames = decoder.push(b"\xA9\n\n");
        assert_eq!(frames[0].data, "\u{FFFD}café");
    }

    #[test]
    fn test_finish_flushes_unterminated_block() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().map(|f| f.data), Some("tail".to_string()));
    }

    #[test]
    fn test_parse_completion_chunk() {
        let data = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_completion_chunk(data).unwrap(), CompletionChunk::Delta("Hi".into()));

        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_completion_chunk(role_only).unwrap(), CompletionChunk::Delta(String::new()));

        assert_eq!(parse_completion_chunk("[DONE]").unwrap(), CompletionChunk::Done);
        assert!(parse_completion_chunk("{not json").is_err());
    }
}
