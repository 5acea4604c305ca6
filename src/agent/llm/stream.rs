//! Streaming replies
//!
//! A [`ReplyStream`] yields text fragments as they arrive and ends with one
//! [`StreamEvent::Done`] carrying the assembled reply. Every read is bounded
//! by an idle timeout, so a stalled connection surfaces as `Timeout`.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::trace;

use super::types::{DeltaAccumulator, StreamChunk};
use super::ModelReply;
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Done(ModelReply),
}

/// Lazily consumed reply stream
pub struct ReplyStream {
    inner: BoxStream<'static, Result<StreamEvent, ProviderError>>,
}

impl ReplyStream {
    pub fn new(inner: impl Stream<Item = Result<StreamEvent, ProviderError>> + Send + 'static) -> Self {
        Self { inner: inner.boxed() }
    }

    /// Wrap an already complete reply (providers without streaming).
    pub fn from_reply(reply: ModelReply) -> Self {
        let mut events = Vec::new();
        if !reply.text.is_empty() {
            events.push(Ok(StreamEvent::Text(reply.text.clone())));
        }
        events.push(Ok(StreamEvent::Done(reply)));
        Self::new(stream::iter(events))
    }

    /// Rewrite text on its way to the consumer. `filter` gets each fragment
    /// and returns what to show; it is called with `None` once before the
    /// final reply so held-back text can be released.
    pub fn filter_text(self, mut filter: impl FnMut(Option<&str>) -> String + Send + 'static) -> Self {
        let events = self.inner.flat_map(move |event| {
            let mut out = Vec::with_capacity(2);
            match event {
                Ok(StreamEvent::Text(chunk)) => {
                    let shown = filter(Some(&chunk));
                    if !shown.is_empty() {
                        out.push(Ok(StreamEvent::Text(shown)));
                    }
                }
                Ok(StreamEvent::Done(reply)) => {
                    let rest = filter(None);
                    if !rest.is_empty() {
                        out.push(Ok(StreamEvent::Text(rest)));
                    }
                    out.push(Ok(StreamEvent::Done(reply)));
                }
                Err(err) => out.push(Err(err)),
            }
            stream::iter(out)
        });
        Self::new(events)
    }

    pub async fn next(&mut self) -> Option<Result<StreamEvent, ProviderError>> {
        self.inner.next().await
    }

    /// Drain the stream, handing each text fragment to `on_text`.
    pub async fn collect_with(mut self, mut on_text: impl FnMut(&str)) -> Result<ModelReply, ProviderError> {
        while let Some(event) = self.next().await {
            match event? {
                StreamEvent::Text(text) => on_text(&text),
                StreamEvent::Done(reply) => return Ok(reply),
            }
        }
        Err(ProviderError::decode("stream", "stream ended without a final reply"))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

/// Next item from `stream`, or a `Timeout` error after `idle` of silence.
async fn next_within<S, T>(stream: &mut S, idle: Duration, provider: &str) -> Result<Option<T>, ProviderError>
where
    S: Stream<Item = T> + Unpin,
{
    tokio::time::timeout(idle, stream.next())
        .await
        .map_err(|_| ProviderError::timeout(provider, idle))
}

/// OpenAI-style server-sent events, terminated by `[DONE]` or end of body.
///
/// `finish` post-processes the assembled reply (Hugging Face uses it to
/// pull tool calls out of the text).
pub fn sse_reply_stream(
    response: reqwest::Response,
    provider: &'static str,
    idle: Duration,
    finish: fn(ModelReply) -> ModelReply,
) -> ReplyStream {
    struct State {
        events: BoxStream<'static, Result<eventsource_stream::Event, String>>,
        acc: Option<DeltaAccumulator>,
    }

    let events = response
        .bytes_stream()
        .eventsource()
        .map(|r| r.map_err(|e| e.to_string()))
        .boxed();
    let state = State {
        events,
        acc: Some(DeltaAccumulator::default()),
    };

    ReplyStream::new(stream::unfold(state, move |mut st| async move {
        st.acc.as_ref()?;
        loop {
            let event = match next_within(&mut st.events, idle, provider).await {
                Err(err) => {
                    st.acc = None;
                    return Some((Err(err), st));
                }
                Ok(Some(Err(e))) => {
                    st.acc = None;
                    let err = ProviderError::new(crate::error::ProviderErrorKind::Network, provider, e);
                    return Some((Err(err), st));
                }
                Ok(Some(Ok(event))) => event,
                Ok(None) => break,
            };
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }
            trace!(provider, data, "sse chunk");
            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    if let Some(text) = st.acc.as_mut().and_then(|acc| acc.push(chunk)) {
                        return Some((Ok(StreamEvent::Text(text)), st));
                    }
                }
                Err(e) => {
                    st.acc = None;
                    let err = ProviderError::decode(provider, format!("bad stream chunk: {e}"));
                    return Some((Err(err), st));
                }
            }
        }
        let reply = st.acc.take()?.finish();
        Some((Ok(StreamEvent::Done(finish(reply))), st))
    }))
}

/// Splits a byte stream into complete lines (newline-delimited JSON).
pub struct LineReader {
    bytes: ByteStream,
    buffer: Vec<u8>,
    idle: Duration,
    provider: &'static str,
    exhausted: bool,
}

impl LineReader {
    pub fn new(response: reqwest::Response, provider: &'static str, idle: Duration) -> Self {
        Self {
            bytes: Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))),
            buffer: Vec::new(),
            idle,
            provider,
            exhausted: false,
        }
    }

    /// Next non-empty line, `None` at end of body.
    pub async fn next_line(&mut self) -> Result<Option<String>, ProviderError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Ok(Some(text));
            }
            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buffer);
                let text = String::from_utf8_lossy(&rest).trim().to_string();
                return Ok((!text.is_empty()).then_some(text));
            }
            match next_within(&mut self.bytes, self.idle, self.provider).await? {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(ProviderError::from_reqwest(self.provider, &e)),
                None => self.exhausted = true,
            }
        }
    }
}
