//! Incremental consumption of `:streamGenerateContent` responses.
//!
//! The body is a sequence of server-sent-event lines. Each `data: ` line
//! carries one JSON response envelope; the first candidate's first text part
//! is forwarded to a callback as soon as its line is complete, so output
//! appears progressively instead of after the whole body arrives.

use futures::stream::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProbeError, Result};
use crate::gemini::types::GenerateContentResponse;

pub const DATA_PREFIX: &str = "data: ";

/// Payload some OpenAI-style proxies send after the last event. Consumption
/// stops when it is seen.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What a single complete line means to the consumer.
#[derive(Debug, PartialEq)]
pub enum LineEvent {
    /// Blank line, comment, or a field other than `data`.
    Ignored,
    /// The terminal sentinel.
    Done,
    /// A decoded envelope with a non-empty text fragment.
    Text(String),
    /// A decoded envelope without text (e.g. a trailing usage-only event).
    NoText,
    /// `data: ` followed by something that is not JSON.
    Malformed,
}

pub fn classify_line(line: &str) -> LineEvent {
    if line.is_empty() {
        return LineEvent::Ignored;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Ignored;
    };
    if payload.trim() == DONE_SENTINEL {
        return LineEvent::Done;
    }
    match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(resp) => match resp.first_text() {
            Some(text) if !text.is_empty() => LineEvent::Text(text.to_string()),
            _ => LineEvent::NoText,
        },
        Err(e) => {
            debug!("Skipping malformed stream line: {}", e);
            LineEvent::Malformed
        }
    }
}

/// Longest line kept in memory before the stream is abandoned.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Bytes are kept until a line ending arrives, so a multi-byte character
/// split across two chunks decodes correctly. `\n`, `\r\n` and a lone `\r`
/// all end a line, including a `\r\n` pair split between chunks.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    after_cr: bool,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            after_cr: false,
            max_line: MAX_LINE_BYTES,
        }
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Fails once an unterminated line grows past the buffer's limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            let after_cr = std::mem::take(&mut self.after_cr);
            match byte {
                b'\n' if after_cr => {}
                b'\n' => lines.push(self.take_line()),
                b'\r' => {
                    lines.push(self.take_line());
                    self.after_cr = true;
                }
                _ => self.pending.push(byte),
            }
        }

        if self.pending.len() > self.max_line {
            return Err(ProbeError::Stream(format!(
                "line exceeds {} bytes without a line ending",
                self.max_line
            )));
        }
        Ok(lines)
    }

    /// Flush a trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

/// Result of consuming one streamed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub text: String,
    pub fragments: usize,
    pub skipped: usize,
    pub done: bool,
}

impl StreamSummary {
    /// Length of the accumulated text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Apply one line. Returns `true` once the stream should stop.
    fn apply<F>(&mut self, line: &str, on_text: &mut F) -> bool
    where
        F: FnMut(&str),
    {
        match classify_line(line) {
            LineEvent::Text(fragment) => {
                on_text(&fragment);
                self.text.push_str(&fragment);
                self.fragments += 1;
            }
            LineEvent::Malformed => self.skipped += 1,
            LineEvent::Done => {
                self.done = true;
                return true;
            }
            LineEvent::Ignored | LineEvent::NoText => {}
        }
        false
    }
}

/// Drive a byte stream to completion, calling `on_text` for every fragment.
///
/// `idle` bounds the wait for each chunk. A chunk error aborts the whole
/// stream; malformed lines only bump `skipped`.
pub async fn consume_stream<S, B, E, F>(
    stream: S,
    idle: Duration,
    mut on_text: F,
) -> Result<StreamSummary>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str),
{
    let mut stream = std::pin::pin!(stream);
    let mut lines = LineBuffer::new();
    let mut summary = StreamSummary::default();
    let mut chunks = 0usize;

    loop {
        let next = timeout(idle, stream.next())
            .await
            .map_err(|_| ProbeError::Timeout {
                operation: "stream chunk",
                secs: idle.as_secs(),
            })?;
        let Some(chunk) = next else {
            break;
        };
        let chunk =
            chunk.map_err(|e| ProbeError::Stream(format!("failed to read chunk: {}", e)))?;
        chunks += 1;

        for line in lines.push(chunk.as_ref())? {
            if summary.apply(&line, &mut on_text) {
                debug!("Stream sentinel after {} chunks", chunks);
                return Ok(summary);
            }
        }
    }

    if let Some(line) = lines.finish() {
        summary.apply(&line, &mut on_text);
    }

    debug!(
        "Stream finished: chunks={}, fragments={}, skipped={}, done={}",
        chunks, summary.fragments, summary.skipped, summary.done
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const HI: &str = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hi"}]}}]}"#;
    const THERE: &str = r#"data: {"candidates":[{"content":{"parts":[{"text":" there"}]}}]}"#;

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Chunk> {
        let owned: Vec<Chunk> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    fn run(parts: &[&str]) -> (StreamSummary, Vec<String>) {
        let mut seen = Vec::new();
        let summary = tokio_test::block_on(consume_stream(
            chunks(parts),
            Duration::from_secs(5),
            |t| seen.push(t.to_string()),
        ))
        .unwrap();
        (summary, seen)
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line(""), LineEvent::Ignored);
        assert_eq!(classify_line(": keep-alive"), LineEvent::Ignored);
        assert_eq!(classify_line("event: message"), LineEvent::Ignored);
        assert_eq!(classify_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(classify_line("data:  [DONE] "), LineEvent::Done);
        assert_eq!(classify_line("data: {not json"), LineEvent::Malformed);
        assert_eq!(classify_line(r#"data: {"candidates":[]}"#), LineEvent::NoText);
        assert_eq!(classify_line(HI), LineEvent::Text("Hi".to_string()));
    }

    #[test]
    fn test_two_line_stream() {
        let body = format!("{HI}\n\n{THERE}\n\n");
        let (summary, seen) = run(&[body.as_str()]);
        assert_eq!(summary.text, "Hi there");
        assert_eq!(summary.char_len(), 8);
        assert_eq!(seen, vec!["Hi", " there"]);
        assert!(!summary.done);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let body = format!("{HI}\ndata: {{oops\n{THERE}\n");
        let (summary, _) = run(&[body.as_str()]);
        assert_eq!(summary.text, "Hi there");
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.fragments, 2);
    }

    #[test]
    fn test_sentinel_stops_consumption() {
        let body = format!("{HI}\ndata: [DONE]\n{THERE}\n");
        let (summary, seen) = run(&[body.as_str()]);
        assert_eq!(summary.text, "Hi");
        assert!(summary.done);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let (first, second) = HI.split_at(20);
        let tail = format!("{second}\r\n");
        let (summary, _) = run(&[first, tail.as_str(), THERE]);
        // THERE has no trailing newline and is flushed at end of stream.
        assert_eq!(summary.text, "Hi there");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let line = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"你好\"}]}}]}\n";
        let bytes = line.as_bytes();
        let cut = line.find('你').unwrap() + 1;
        let parts: Vec<Chunk> = vec![Ok(bytes[..cut].to_vec()), Ok(bytes[cut..].to_vec())];

        let summary = tokio_test::block_on(consume_stream(
            stream::iter(parts),
            Duration::from_secs(5),
            |_| {},
        ))
        .unwrap();
        assert_eq!(summary.text, "你好");
        assert_eq!(summary.char_len(), 2);
    }

    #[test]
    fn test_chunk_error_aborts() {
        let parts: Vec<Chunk> = vec![
            Ok(format!("{HI}\n").into_bytes()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(format!("{THERE}\n").into_bytes()),
        ];
        let err = tokio_test::block_on(consume_stream(
            stream::iter(parts),
            Duration::from_secs(5),
            |_| {},
        ))
        .unwrap_err();
        assert!(matches!(err, ProbeError::Stream(_)));
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: a").unwrap().is_empty());
        assert_eq!(buf.push(b"bc\ndata: d").unwrap(), vec!["data: abc"]);
        assert_eq!(buf.finish(), Some("data: d".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_line_buffer_line_endings() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"a\rb\r\nc\n").unwrap(), vec!["a", "b", "c"]);

        // A CRLF pair split between chunks is a single line ending.
        assert_eq!(buf.push(b"d\r").unwrap(), vec!["d"]);
        assert_eq!(buf.push(b"\ne\r\r").unwrap(), vec!["e", ""]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_bare_carriage_return_separates_events() {
        let body = format!("{HI}\r{THERE}\r");
        let (summary, seen) = run(&[body.as_str()]);
        assert_eq!(summary.text, "Hi there");
        assert_eq!(summary.skipped, 0);
        assert_eq!(seen, vec!["Hi", " there"]);
    }

    #[test]
    fn test_line_buffer_rejects_unterminated_line() {
        let mut buf = LineBuffer {
            max_line: 8,
            ..LineBuffer::default()
        };
        assert_eq!(buf.push(b"data: a\n").unwrap(), vec!["data: a"]);
        assert!(buf.push(b"data: ").unwrap().is_empty());
        let err = buf.push(b"abcdef").unwrap_err();
        assert!(matches!(err, ProbeError::Stream(_)));
    }

    #[test]
    fn test_oversized_line_aborts_stream() {
        let big = vec![b'x'; MAX_LINE_BYTES / 2];
        let parts: Vec<Chunk> = vec![Ok(big.clone()), Ok(big.clone()), Ok(big)];
        let err = tokio_test::block_on(consume_stream(
            stream::iter(parts),
            Duration::from_secs(5),
            |_| {},
        ))
        .unwrap_err();
        assert!(matches!(err, ProbeError::Stream(_)));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let never = stream::pending::<Chunk>();
        let err = consume_stream(never, Duration::from_millis(20), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
    }
}
