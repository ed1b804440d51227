//! Line-framed JSON decoding for streaming HTTP bodies.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// How JSON payloads are framed in a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// One JSON document per line (Ollama).
    Ndjson,
    /// Server-sent events, JSON in `data:` lines (llama-server).
    Sse,
}

impl Framing {
    /// Extract the JSON payload of one line, or `None` if the line carries none.
    fn payload<'a>(&self, line: &'a [u8]) -> Option<&'a [u8]> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }
        match self {
            Framing::Ndjson => Some(line),
            Framing::Sse => {
                let data = line.strip_prefix(b"data:")?.trim_ascii();
                if data.is_empty() || data == b"[DONE]" {
                    None
                } else {
                    Some(data)
                }
            }
        }
    }
}

/// Bytes received but not yet split into lines.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    /// Prefix of `bytes` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Take the next complete line, newline included.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.bytes[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                Some(self.bytes.drain(..=end).collect())
            }
            None => {
                self.scanned = self.bytes.len();
                None
            }
        }
    }

    /// Take whatever is left, for a last line without a trailing newline.
    fn take_rest(&mut self) -> Vec<u8> {
        self.scanned = 0;
        std::mem::take(&mut self.bytes)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.scanned = 0;
    }
}

struct LineState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: LineBuffer,
    finished: bool,
    framing: Framing,
}

/// Decode a response body into a stream of JSON values, one per framed line.
///
/// A transport error ends the stream after being yielded once. Dropping the
/// stream drops the body, which closes the connection.
pub(crate) fn decode<T>(response: reqwest::Response, framing: Framing) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let state = LineState {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        buffer: LineBuffer::default(),
        finished: false,
        framing,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.buffer.next_line() {
                if let Some(item) = parse_line::<T>(st.framing, &line) {
                    return Some((item, st));
                }
                continue;
            }

            if st.finished {
                if st.buffer.is_empty() {
                    return None;
                }
                // Last line without a trailing newline
                let line = st.buffer.take_rest();
                return parse_line::<T>(st.framing, &line).map(|item| (item, st));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buffer.extend(&chunk),
                Some(Err(e)) => {
                    st.finished = true;
                    st.buffer.clear();
                    return Some((Err(Error::from(e)), st));
                }
                None => st.finished = true,
            }
        }
    })
    .boxed()
}

fn parse_line<T: DeserializeOwned>(framing: Framing, line: &[u8]) -> Option<Result<T>> {
    let payload = framing.payload(line)?;
    Some(serde_json::from_slice(payload).map_err(|e| {
        Error::InferenceFailed(format!(
            "undecodable stream line {:?}: {}",
            String::from_utf8_lossy(payload),
            e
        ))
    }))
}
