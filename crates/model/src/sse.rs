//! SSE plumbing shared by streaming backends.
//!
//! A streaming chat response arrives as `text/event-stream` chunks. The
//! helpers here buffer chunks, split on the `\n\n` event delimiter, pull
//! out `data:` payloads, and feed each payload to a backend-specific
//! parser that returns zero or more stream events.

use skein_domain::stream::{BoxStream, LlmStreamEvent};

use crate::error::InvokeError;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`. A block may contain `event:`, `id:`,
/// or `retry:` lines as well; only `data:` lines matter here. The buffer
/// is drained in place and any trailing partial event remains for the
/// next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

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

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a parser
/// closure.
///
/// The closure is `FnMut` because tool-call assembly needs mutable state
/// across payloads. `flush` runs once after the body closes so the parser
/// can emit anything it was still accumulating. If neither produced a
/// `Done` event, a fallback one is appended.
pub(crate) fn sse_response_stream<F, G>(
    response: reqwest::Response,
    mut parse_data: F,
    flush: G,
) -> BoxStream<'static, Result<LlmStreamEvent, InvokeError>>
where
    F: FnMut(&str) -> Vec<Result<LlmStreamEvent, InvokeError>> + Send + 'static,
    G: FnOnce() -> Vec<Result<LlmStreamEvent, InvokeError>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;
        let mut flush = Some(flush);

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            if matches!(&event, Ok(LlmStreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body ended. Flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                if matches!(&event, Ok(LlmStreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(InvokeError::Connection(e.to_string()));
                    break;
                }
            }
        }

        if let Some(flush) = flush.take() {
            for event in flush() {
                if matches!(&event, Ok(LlmStreamEvent::Done { .. })) {
                    done_emitted = true;
                }
                yield event;
            }
        }

        if !done_emitted {
            yield Ok(LlmStreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_skips_empty_data_lines() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn drain_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());
        assert_eq!(buf, "data: chunk1");

        buf.push_str("\n\ndata: chunk2\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
