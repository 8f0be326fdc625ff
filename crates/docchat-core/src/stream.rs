//! Decoding of the newline-delimited JSON chat stream.
//!
//! The `/chat` endpoint answers with one JSON envelope per line. Lines that
//! don't parse are dropped without error; the stream keeps going.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ApiError;
use crate::state::SourceInfo;

/// One line of the streamed chat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEnvelope {
    Token(String),
    Error(String),
    Sources(Vec<SourceInfo>),
}

/// How line fragments that straddle two network chunks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMode {
    /// Carry a partial trailing line over to the next chunk.
    #[default]
    Buffered,
    /// Split every chunk on its own; a fragment on either side of a chunk
    /// boundary fails to parse and is dropped.
    PerChunk,
}

/// Incremental envelope decoder, fed one network chunk at a time.
#[derive(Debug, Default)]
pub struct EnvelopeDecoder {
    mode: LineMode,
    pending: Vec<u8>,
}

impl EnvelopeDecoder {
    pub fn new(mode: LineMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
        }
    }

    /// Decode every complete envelope contained in `chunk`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEnvelope> {
        match self.mode {
            LineMode::PerChunk => {
                let text = String::from_utf8_lossy(chunk);
                text.split('\n').filter_map(parse_line).collect()
            }
            LineMode::Buffered => {
                self.pending.extend_from_slice(chunk);
                let mut out = Vec::new();
                while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    let line = &line[..line.len() - 1];
                    match std::str::from_utf8(line) {
                        Ok(text) => out.extend(parse_line(text)),
                        Err(err) => trace!(%err, "dropping non-utf8 stream line"),
                    }
                }
                out
            }
        }
    }

    /// Flush an unterminated final line at end of stream.
    pub fn finish(&mut self) -> Option<StreamEnvelope> {
        let rest = std::mem::take(&mut self.pending);
        std::str::from_utf8(&rest).ok().and_then(parse_line)
    }
}

fn parse_line(line: &str) -> Option<StreamEnvelope> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            trace!(%err, line, "dropping malformed stream line");
            None
        }
    }
}

struct DecodeState<S> {
    chunks: Pin<Box<S>>,
    decoder: EnvelopeDecoder,
    ready: VecDeque<StreamEnvelope>,
    cancel: Option<CancellationToken>,
    finished: bool,
}

enum NextChunk<T> {
    Cancelled,
    Chunk(Option<T>),
}

/// Lazily turn a byte-chunk stream into envelopes.
///
/// When `cancel` is given it is checked once per chunk read: envelopes
/// already decoded from the current chunk are still yielded, then the
/// stream ends with `ApiError::Aborted`. A transport error ends the stream
/// after being yielded once.
pub fn envelopes<S, B, E>(
    chunks: S,
    mode: LineMode,
    cancel: Option<CancellationToken>,
) -> impl Stream<Item = Result<StreamEnvelope, ApiError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: EnvelopeDecoder::new(mode),
        ready: VecDeque::new(),
        cancel,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(envelope) = state.ready.pop_front() {
                return Some((Ok(envelope), state));
            }
            if state.finished {
                return None;
            }

            let next = match state.cancel.clone() {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => NextChunk::Cancelled,
                    chunk = state.chunks.next() => NextChunk::Chunk(chunk),
                },
                None => NextChunk::Chunk(state.chunks.next().await),
            };

            match next {
                NextChunk::Cancelled => {
                    state.finished = true;
                    return Some((Err(ApiError::Aborted), state));
                }
                NextChunk::Chunk(Some(Ok(chunk))) => {
                    let decoded = state.decoder.push(chunk.as_ref());
                    state.ready.extend(decoded);
                }
                NextChunk::Chunk(Some(Err(err))) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                NextChunk::Chunk(None) => {
                    state.finished = true;
                    let tail = state.decoder.finish();
                    state.ready.extend(tail);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> Vec<Result<Vec<u8>, ApiError>> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    async fn collect(parts: &[&str], mode: LineMode) -> Vec<StreamEnvelope> {
        envelopes(stream::iter(chunks(parts)), mode, None)
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await
    }

    fn token(s: &str) -> StreamEnvelope {
        StreamEnvelope::Token(s.to_string())
    }

    #[test]
    fn parses_all_envelope_kinds() {
        let mut decoder = EnvelopeDecoder::new(LineMode::Buffered);
        let out = decoder.push(
            concat!(
                r#"{"type":"token","data":"Hi"}"#, "\n",
                r#"{"type":"error","data":"model down"}"#, "\n",
                r#"{"type":"sources","data":[{"page":3,"preview":"intro"}]}"#, "\n",
            )
            .as_bytes(),
        );
        assert_eq!(
            out,
            vec![
                token("Hi"),
                StreamEnvelope::Error("model down".to_string()),
                StreamEnvelope::Sources(vec![SourceInfo {
                    page: 3,
                    preview: "intro".to_string()
                }]),
            ]
        );
    }

    #[test]
    fn drops_garbage_empty_and_unknown_lines() {
        let mut decoder = EnvelopeDecoder::new(LineMode::PerChunk);
        let out = decoder.push(
            b"not json\n\n{\"type\":\"done\",\"data\":\"\"}\n{\"type\":\"token\",\"data\":\"ok\"}\n\n",
        );
        assert_eq!(out, vec![token("ok")]);
    }

    #[tokio::test]
    async fn per_chunk_mode_drops_split_envelope_but_keeps_later_ones() {
        let out = collect(
            &[
                "{\"type\":\"token\",\"data\":\"Par",
                "is\"}\n{\"type\":\"token\",\"data\":\" is the capital.\"}\n",
            ],
            LineMode::PerChunk,
        )
        .await;
        assert_eq!(out, vec![token(" is the capital.")]);
    }

    #[tokio::test]
    async fn buffered_mode_reassembles_split_envelope() {
        let out = collect(
            &[
                "{\"type\":\"token\",\"data\":\"Par",
                "is\"}\n{\"type\":\"token\",\"data\":\" is the capital.\"}\n",
            ],
            LineMode::Buffered,
        )
        .await;
        assert_eq!(out, vec![token("Paris"), token(" is the capital.")]);
    }

    #[tokio::test]
    async fn buffered_mode_flushes_unterminated_tail() {
        let out = collect(&["{\"type\":\"token\",\"data\":\"a\"}\n{\"type\":\"token\",\"data\":\"b\"}"], LineMode::Buffered).await;
        assert_eq!(out, vec![token("a"), token("b")]);
    }

    #[tokio::test]
    async fn buffered_mode_survives_multibyte_split() {
        let line = "{\"type\":\"token\",\"data\":\"café\"}\n".as_bytes();
        let split = line.len() - 4;
        let parts = vec![
            Ok::<_, ApiError>(line[..split].to_vec()),
            Ok(line[split..].to_vec()),
        ];
        let out: Vec<_> = envelopes(stream::iter(parts), LineMode::Buffered, None)
            .collect()
            .await;
        assert_eq!(out, vec![Ok(token("café"))]);
    }

    #[tokio::test]
    async fn transport_error_is_yielded_once_then_stream_ends() {
        let parts = vec![
            Ok(b"{\"type\":\"token\",\"data\":\"x\"}\n".to_vec()),
            Err(ApiError::network("reset by peer")),
            Ok(b"{\"type\":\"token\",\"data\":\"y\"}\n".to_vec()),
        ];
        let out: Vec<_> = envelopes(stream::iter(parts), LineMode::Buffered, None)
            .collect()
            .await;
        assert_eq!(out, vec![Ok(token("x")), Err(ApiError::network("reset by peer"))]);
    }

    #[tokio::test]
    async fn cancellation_finishes_current_chunk_then_aborts() {
        let token_handle = CancellationToken::new();
        let mut out = Box::pin(envelopes(
            stream::iter(chunks(&[
                "{\"type\":\"token\",\"data\":\"a\"}\n{\"type\":\"token\",\"data\":\"b\"}\n",
                "{\"type\":\"token\",\"data\":\"c\"}\n",
            ])),
            LineMode::Buffered,
            Some(token_handle.clone()),
        ));

        assert_eq!(out.next().await, Some(Ok(token("a"))));
        token_handle.cancel();
        assert_eq!(out.next().await, Some(Ok(token("b"))));
        assert_eq!(out.next().await, Some(Err(ApiError::Aborted)));
        assert_eq!(out.next().await, None);
    }
}
