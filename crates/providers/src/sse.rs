//! SSE plumbing for streamed completions.
//!
//! - [`drain_data_lines`] pulls complete `data:` payloads from a byte buffer
//! - [`sse_response_stream`] turns a response plus a parser into a `BoxStream`

use crate::util::from_reqwest;
use bk_domain::error::Result;
use bk_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`.  Each event block may contain
/// `event:`, `data:`, `id:`, or `retry:` lines.  We only care about
/// `data:` lines.
///
/// The buffer holds raw bytes and is drained in-place: consumed bytes are
/// removed and any trailing partial event remains for the next call. Only
/// whole events are decoded, so a UTF-8 sequence split across network
/// chunks is reassembled before decoding.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let block: Vec<u8> = buffer.drain(..pos + 2).collect();
        let block = String::from_utf8_lossy(&block[..pos]);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a provider-specific
/// parser closure.
///
/// The parser is `FnMut` so it can carry tool-call assembly state between
/// payloads. A trailing partial event is flushed when the body closes, and a
/// `Done` is synthesized if the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();
        let mut done_emitted = false;
        let mut closed = false;

        while !closed {
            match response.chunk().await {
                Ok(Some(bytes)) => buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    closed = true;
                    if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        buffer.extend_from_slice(b"\n\n");
                    }
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }

            for data in drain_data_lines(&mut buffer) {
                for event in parse_data(&data) {
                    done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
