//! Incremental SSE parsing.
//!
//! llama-server streams `data: {...}\n\n` events. This turns a raw byte
//! stream into the sequence of `data` payloads, tolerating events split
//! across network chunks.

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use genserve_core::BackendError;

struct SseState<E> {
    stream: BoxStream<'static, Result<Bytes, E>>,
    buf: BytesMut,
    done: bool,
}

/// Yield each `data:` payload of an SSE byte stream.
///
/// Comments, blank lines and other fields are skipped; `[DONE]` ends the
/// sequence. A trailing line without a newline is still delivered when the
/// upstream closes.
pub fn data_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, BackendError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        stream: byte_stream.boxed(),
        buf: BytesMut::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if st.done && st.buf.is_empty() {
                return None;
            }

            let line = match find_newline(&st.buf) {
                Some(line_end) => Some(st.buf.split_to(line_end)),
                // Upstream closed: flush what is left as a final line.
                None if st.done => Some(st.buf.split()),
                None => None,
            };

            if let Some(line) = line {
                let line = String::from_utf8_lossy(&line);
                let trimmed = line.trim();

                if let Some(data) = trimmed.strip_prefix("data:") {
                    let data = data.trim();
                    if data == "[DONE]" {
                        st.done = true;
                        st.buf.clear();
                        return None;
                    }
                    if !data.is_empty() {
                        return Some((Ok(data.to_string()), st));
                    }
                }
                continue;
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Upstream stream error: {e}");
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(BackendError::Upstream(e.to_string())), st));
                }
                None => st.done = true,
            }
        }
    })
}

fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}
