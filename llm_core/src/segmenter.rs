//! Sentence-sized re-chunking of incremental completion text.
//!
//! Deltas are appended to a buffer and the whole buffer is released as soon
//! as it ends with [`SENTENCE_TERMINATOR`]. A delta carrying several
//! terminators is never split: only the end of the buffer is inspected, so
//! `"One. Two."` arriving as a single delta is emitted as a single chunk and
//! `"One. Two"` stays buffered until a later delta or the end of the stream.

use async_stream::stream;
use futures::{Stream, StreamExt};

/// The only character that closes a sentence chunk.
pub const SENTENCE_TERMINATOR: char = '.';

/// Append `delta` to `prior` and release the buffer if it now closes a sentence.
///
/// Returns the emitted chunks (zero or one) and the buffer to carry forward.
pub fn segment(prior: String, delta: &str) -> (Vec<String>, String) {
    let mut buffer = prior;
    buffer.push_str(delta);
    if buffer.ends_with(SENTENCE_TERMINATOR) {
        (vec![buffer], String::new())
    } else {
        (Vec::new(), buffer)
    }
}

/// Stateful wrapper around [`segment`] for callers that push deltas one by one.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns a chunk when the buffer closes a sentence.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        let (emitted, rest) = segment(std::mem::take(&mut self.buffer), delta);
        self.buffer = rest;
        emitted.into_iter().next()
    }

    /// Release whatever is left once the input has ended. Empty residue yields nothing.
    pub fn finish(self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Lazily re-chunk a fallible delta stream into sentence chunks.
///
/// The first upstream error is forwarded and ends the stream; buffered text is
/// not flushed after an error.
pub fn sentence_chunks<S, E>(deltas: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<String, E>>,
{
    stream! {
        let mut segmenter = SentenceSegmenter::new();
        let mut deltas = std::pin::pin!(deltas);
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(delta) => {
                    if let Some(chunk) = segmenter.push(&delta) {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(rest) = segmenter.finish() {
            yield Ok(rest);
        }
    }
}
