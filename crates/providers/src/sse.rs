//! Server-sent-event plumbing for upstream model responses.
//!
//! - [`drain_data_lines`] pulls complete `data:` payloads from a buffer
//! - [`sse_response_stream`] turns a response plus a parser into a stream

use crate::util::from_reqwest;
use ny_domain::error::Result;
use ny_domain::stream::{BoxStream, ModelEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Blocks end at `\n\n`; only `data:` lines are kept. Consumed bytes are
/// removed and a trailing partial block stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] of model events from an SSE response.
///
/// `parse_data` receives each `data:` payload and may keep state across
/// calls (tool-call assembly). A `Done` event is appended if the parser
/// never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<ModelEvent>>
where
    F: FnMut(&str) -> Vec<Result<ModelEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;
        let mut body_open = true;

        while body_open {
            let data_lines = match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    drain_data_lines(&mut buffer)
                }
                Ok(None) => {
                    body_open = false;
                    if buffer.trim().is_empty() {
                        Vec::new()
                    } else {
                        buffer.push_str("\n\n");
                        drain_data_lines(&mut buffer)
                    }
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };
            for data in data_lines {
                for event in parse_data(&data) {
                    if matches!(&event, Ok(ModelEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(ModelEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}
