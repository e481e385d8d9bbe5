//! Line framing shared by every adapter, and the resilient decode loop.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio_util::sync::CancellationToken;

use crate::provider::ChunkStream;
use crate::types::{ProviderKind, StreamChunk};
use crate::Error;

/// A single line longer than this is treated as an unrecoverable stream.
const MAX_LINE_BYTES: usize = 1_000_000;

/// Splits a byte stream into complete text lines.
///
/// A partial line is kept across reads until its newline arrives. Whatever is
/// left when the input ends is yielded as a final line so the decoder can try
/// it. Blank lines are dropped, `\r\n` endings are accepted, and a line that is
/// not valid UTF-8 is logged and skipped.
pub struct LineStream<S> {
    inner: S,
    provider: ProviderKind,
    /// Bytes of the current, incomplete line
    buffer: Vec<u8>,
    /// Complete lines ready to be yielded
    lines: VecDeque<String>,
    finished: bool,
}

impl<S> LineStream<S> {
    pub fn new(stream: S, provider: ProviderKind) -> Self {
        Self {
            inner: stream,
            provider,
            buffer: Vec::new(),
            lines: VecDeque::new(),
            finished: false,
        }
    }

    fn split_buffer(&mut self) {
        let mut start = 0;
        while let Some(pos) = memchr::memchr(b'\n', &self.buffer[start..]) {
            let end = start + pos;
            let line = self.buffer[start..end].to_vec();
            self.push_line(line);
            start = end + 1;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
    }

    fn push_line(&mut self, mut bytes: Vec<u8>) {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => self.lines.push_back(line),
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "skipping line with invalid UTF-8");
            }
        }
    }
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.split_buffer();

                    if self.buffer.len() > MAX_LINE_BYTES {
                        self.buffer.clear();
                        self.finished = true;
                        return Poll::Ready(Some(Err(Error::parse(
                            self.provider,
                            "response line exceeded the maximum size",
                        ))));
                    }
                }
                Some(Err(e)) => {
                    self.buffer.clear();
                    self.finished = true;
                    return Poll::Ready(Some(Err(Error::network(self.provider, e))));
                }
                None => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.push_line(rest);
                    }
                }
            }
        }
    }
}

/// Payload of an event-stream `data:` line, if this is one.
pub fn sse_data(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value).trim_end())
}

/// Why a single frame produced no chunk.
#[derive(Debug)]
pub enum FrameError {
    /// Unparseable frame. Logged and skipped.
    Malformed(String),
    /// The provider reported an error inside the stream. Ends the stream.
    Provider(Error),
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Malformed(e.to_string())
    }
}

/// Provider-specific, stateful decoding of one line at a time.
pub trait FrameDecoder: Send {
    /// Decode one complete line. `Ok(None)` means the line carries no text.
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError>;

    /// Called once when input ends without a terminal chunk.
    fn finish(&mut self) -> StreamChunk {
        StreamChunk::done("", None)
    }
}

struct DecodeState<S, D> {
    lines: LineStream<S>,
    decoder: D,
    signal: CancellationToken,
    provider: ProviderKind,
    finished: bool,
}

/// Drive `decoder` over the lines of `bytes`.
///
/// Malformed frames are skipped. Exactly one chunk with `done` set is
/// produced unless the stream fails or `signal` is cancelled, in which case the
/// last item is an error (`ABORTED` for cancellation).
pub fn decode_frames<S, E, D>(
    bytes: S,
    signal: CancellationToken,
    provider: ProviderKind,
    decoder: D,
) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: fmt::Display + 'static,
    D: FrameDecoder + 'static,
{
    let state = DecodeState {
        lines: LineStream::new(bytes, provider),
        decoder,
        signal,
        provider,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = st.signal.cancelled() => {
                    st.finished = true;
                    return Some((Err(Error::aborted(st.provider)), st));
                }
                line = st.lines.next() => line,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.finished = true;
                    let last = st.decoder.finish();
                    return Some((Ok(last), st));
                }
            };

            match st.decoder.decode_line(&line) {
                Ok(Some(chunk)) => {
                    st.finished = chunk.done;
                    return Some((Ok(chunk), st));
                }
                Ok(None) => continue,
                Err(FrameError::Provider(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                Err(FrameError::Malformed(reason)) => {
                    tracing::warn!(
                        provider = %st.provider,
                        error = %reason,
                        line = %preview(&line),
                        "skipping malformed frame"
                    );
                }
            }
        }
    }))
}

fn preview(line: &str) -> String {
    line.chars().take(80).collect()
}
