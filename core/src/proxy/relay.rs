//! Streaming relay: Gemini SSE records in, OpenAI chunk frames out
//!
//! A producer task reads the upstream body one record at a time and pushes
//! translated frames into a bounded channel that the HTTP response body drains.
//! Dropping the client-side stream cancels the producer, which drops the
//! upstream response and closes its connection.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::proxy::mappers::gemini_to_openai::{convert_stream_chunk, StreamContext};
use crate::proxy::mappers::models::ChunkEvent;

/// Terminal sentinel sent after the last upstream record
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting on the next upstream record
    Open,
    /// Handing a translated frame to the client
    Forwarding,
    /// Upstream finished, sending the sentinel
    Draining,
    Closed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Cancellation token fired (client disconnected or caller gave up)
    Cancelled,
    /// Client side of the channel was dropped
    ClientGone,
    /// No upstream record arrived within the idle timeout
    IdleTimeout,
    /// Transport or framing failure while reading the upstream body
    Upstream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { forwarded: usize, skipped: usize },
    Aborted { reason: AbortReason, forwarded: usize },
}

/// Client-facing frames. Dropping it cancels the relay.
pub struct ClientEventStream {
    inner: ReceiverStream<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ClientEventStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.inner.poll_next_unpin(cx)
    }
}

pub struct RelayHandle {
    pub events: ClientEventStream,
    pub task: JoinHandle<RelayOutcome>,
}

/// Start relaying `upstream` (a raw SSE byte stream) on a background task.
pub fn spawn_relay<S, E>(
    upstream: S,
    context: StreamContext,
    config: &RelayConfig,
    cancel: CancellationToken,
    trace_id: String,
) -> RelayHandle
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

    let relay = StreamRelay {
        state: RelayState::Open,
        forwarded: 0,
        skipped: 0,
        context,
        trace_id,
        idle_timeout: config.idle_timeout(),
    };
    let task = tokio::spawn(relay.run(upstream, tx, cancel.clone()));

    RelayHandle {
        events: ClientEventStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        },
        task,
    }
}

struct StreamRelay {
    state: RelayState,
    forwarded: usize,
    skipped: usize,
    context: StreamContext,
    trace_id: String,
    idle_timeout: Duration,
}

impl StreamRelay {
    async fn run<S, E>(
        mut self,
        upstream: S,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> RelayOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mut decoder = LossyUtf8::default();
        let mut records = Box::pin(upstream.map(move |chunk| chunk.map(|bytes| decoder.decode(&bytes))))
            .eventsource();

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break self.abort(AbortReason::Cancelled),
                _ = tx.closed() => break self.abort(AbortReason::ClientGone),
                next = tokio::time::timeout(self.idle_timeout, records.next()) => next,
            };

            let record = match next {
                Ok(Some(Ok(record))) => record,
                Ok(None) => break self.drain(&tx, &cancel).await,
                Ok(Some(Err(e))) => break self.abort(AbortReason::Upstream(e.to_string())),
                Err(_) => break self.abort(AbortReason::IdleTimeout),
            };

            match convert_stream_chunk(&record.data) {
                ChunkEvent::Text(text) => {
                    if let Err(reason) = self.forward(&tx, &cancel, &text).await {
                        break self.abort(reason);
                    }
                }
                ChunkEvent::Empty => {
                    trace!("[{}] Record without text, suppressed", self.trace_id);
                }
                ChunkEvent::Malformed(e) => {
                    self.skipped += 1;
                    debug!("[{}] Skipping undecodable record: {} | data: {}", self.trace_id, e, record.data);
                }
                ChunkEvent::UpstreamError(e) => break self.abort(AbortReason::Upstream(e)),
            }
        };

        // Release the upstream connection before reporting
        drop(records);
        self.report(&outcome);
        outcome
    }

    async fn forward(
        &mut self,
        tx: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<(), AbortReason> {
        self.transition(RelayState::Forwarding);
        let frame = format!(
            "data: {}\n\n",
            serde_json::to_string(&self.context.delta(text)).unwrap_or_default()
        );
        send(tx, cancel, Bytes::from(frame)).await?;
        self.forwarded += 1;
        self.transition(RelayState::Open);
        Ok(())
    }

    async fn drain(&mut self, tx: &mpsc::Sender<Bytes>, cancel: &CancellationToken) -> RelayOutcome {
        self.transition(RelayState::Draining);
        match send(tx, cancel, Bytes::from_static(DONE_FRAME.as_bytes())).await {
            Ok(()) => {
                self.transition(RelayState::Closed);
                RelayOutcome::Completed {
                    forwarded: self.forwarded,
                    skipped: self.skipped,
                }
            }
            Err(reason) => self.abort(reason),
        }
    }

    fn abort(&mut self, reason: AbortReason) -> RelayOutcome {
        self.transition(RelayState::Aborted);
        RelayOutcome::Aborted {
            reason,
            forwarded: self.forwarded,
        }
    }

    fn transition(&mut self, next: RelayState) {
        trace!("[{}] Relay {:?} -> {:?}", self.trace_id, self.state, next);
        self.state = next;
    }

    fn report(&self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Completed { forwarded, skipped } => {
                info!("[{}] Stream completed | Chunks: {} | Skipped: {}", self.trace_id, forwarded, skipped);
            }
            RelayOutcome::Aborted {
                reason: AbortReason::Cancelled | AbortReason::ClientGone,
                forwarded,
            } => {
                info!("[{}] Client went away after {} chunk(s), upstream released", self.trace_id, forwarded);
            }
            RelayOutcome::Aborted { reason, forwarded } => {
                warn!("[{}] Stream aborted after {} chunk(s): {:?}", self.trace_id, forwarded, reason);
            }
        }
    }
}

/// Incremental UTF-8 decoding across reads.
///
/// A multibyte character split between reads is held back until completed.
/// Invalid sequences become U+FFFD, so a bad record fails JSON decoding on its
/// own instead of failing the event parser for the rest of the stream.
#[derive(Default)]
struct LossyUtf8 {
    pending: Vec<u8>,
}

impl LossyUtf8 {
    fn decode(&mut self, bytes: &[u8]) -> Bytes {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Checked by from_utf8 above
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Truncated sequence at the end of this read
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        Bytes::from(out)
    }
}

/// Bounded send that gives up as soon as the relay is cancelled
async fn send(
    tx: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
    frame: Bytes,
) -> Result<(), AbortReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AbortReason::Cancelled),
        sent = tx.send(frame) => sent.map_err(|_| AbortReason::ClientGone),
    }
}
