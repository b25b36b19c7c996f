//! Reader Loop
//!
//! Sole owner of the read half: header → exact payload → unpack → key →
//! take pending entry → deliver. A bad header, short read or undecodable
//! payload ends the loop, since a length-prefixed stream cannot
//! resynchronize after a corrupt frame. Replies nobody is waiting for are
//! logged and queued as [`UnmatchedMessage`]s; they never stop the loop.

use crate::correlation::CorrelationPolicy;
use crate::lifecycle::{DrainReason, Lifecycle};
use crate::pending::CorrelationTable;
use crate::stats::ClientStats;
use crate::{ClientError, Result};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use txlink_codec::{CodecError, LengthHeader, MessageCodec};

/// Why an inbound message could not be delivered to a caller
#[derive(Debug, Clone)]
pub enum UnmatchedReason {
    /// No outstanding request holds the key
    NoPendingRequest,
    /// The request existed but its caller stopped waiting
    CallerGone,
    /// The correlation key could not be derived
    NoCorrelationKey(ClientError),
}

/// Inbound message that reached no caller
#[derive(Debug)]
pub struct UnmatchedMessage<M> {
    pub key: Option<String>,
    pub reason: UnmatchedReason,
    pub message: M,
}

pub(crate) struct ReaderLoop<R, C: MessageCodec> {
    reader: BufReader<R>,
    codec: Arc<C>,
    header: Arc<dyn LengthHeader>,
    policy: Arc<dyn CorrelationPolicy<C::Message>>,
    table: Arc<CorrelationTable<C::Message>>,
    lifecycle: Arc<Lifecycle<C::Message>>,
    stats: Arc<ClientStats>,
    unmatched: Option<mpsc::Sender<UnmatchedMessage<C::Message>>>,
    max_frame_size: usize,
    header_buf: Vec<u8>,
    peer: String,
}

impl<R, C> ReaderLoop<R, C>
where
    R: AsyncRead + Unpin + Send + 'static,
    C: MessageCodec,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        reader: BufReader<R>,
        codec: Arc<C>,
        header: Arc<dyn LengthHeader>,
        policy: Arc<dyn CorrelationPolicy<C::Message>>,
        table: Arc<CorrelationTable<C::Message>>,
        lifecycle: Arc<Lifecycle<C::Message>>,
        stats: Arc<ClientStats>,
        unmatched: Option<mpsc::Sender<UnmatchedMessage<C::Message>>>,
        max_frame_size: usize,
        peer: String,
    ) -> Self {
        let header_buf = vec![0u8; header.header_len()];
        Self {
            reader,
            codec,
            header,
            policy,
            table,
            lifecycle,
            stats,
            unmatched,
            max_frame_size,
            header_buf,
            peer,
        }
    }

    pub(crate) async fn run(mut self) {
        let shutdown = self.lifecycle.shutdown_token();

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break None,
                frame = self.read_frame() => frame,
            };

            let outcome = match frame {
                Ok(Some(payload)) => self.dispatch(&payload),
                Ok(None) => {
                    debug!(peer = %self.peer, "Connection closed by peer");
                    break Some(DrainReason::PeerClosed);
                }
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                error!(peer = %self.peer, error = %e, "Reader loop terminating");
                break Some(DrainReason::ReadFailure(e));
            }
        };

        if let Some(reason) = reason {
            self.lifecycle.begin_drain(reason);
        }
        debug!(peer = %self.peer, "Reader loop exiting");
    }

    /// Read one frame; `None` on a clean end of stream at a frame boundary
    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let available = self
            .reader
            .fill_buf()
            .await
            .map_err(|e| ClientError::framing_with_source("reading length header", e))?;
        if available.is_empty() {
            return Ok(None);
        }

        self.reader
            .read_exact(&mut self.header_buf)
            .await
            .map_err(|e| ClientError::framing_with_source("short length header", e))?;

        let length = self
            .header
            .decode(&self.header_buf)
            .map_err(ClientError::InvalidLengthHeader)?;

        if length > self.max_frame_size {
            return Err(ClientError::InvalidLengthHeader(
                CodecError::LengthOutOfRange {
                    length,
                    max: self.max_frame_size,
                    header: "max_frame_size",
                },
            ));
        }

        let mut payload = BytesMut::with_capacity(length);
        payload.resize(length, 0);
        self.reader.read_exact(&mut payload).await.map_err(|e| {
            ClientError::framing_with_source(format!("short read of {} byte payload", length), e)
        })?;

        self.stats
            .record_received(self.header_buf.len() + length);
        Ok(Some(payload.freeze()))
    }

    /// Decode a payload and hand it to whoever is waiting for it
    fn dispatch(&mut self, payload: &[u8]) -> Result<()> {
        let message = self
            .codec
            .unpack(payload)
            .map_err(ClientError::DecodeFailure)?;

        let key = match self.policy.derive_key(&message) {
            Ok(key) => key,
            Err(e) => {
                self.unmatched(None, UnmatchedReason::NoCorrelationKey(e), message);
                return Ok(());
            }
        };

        match self.table.take(&key) {
            Some(entry) => {
                let latency = entry.age();
                match entry.resolve(message) {
                    Ok(()) => {
                        self.stats.record_matched();
                        debug!(
                            peer = %self.peer,
                            key = %key,
                            latency_us = latency.as_micros() as u64,
                            "Delivered reply"
                        );
                    }
                    Err(message) => {
                        self.unmatched(Some(key), UnmatchedReason::CallerGone, message)
                    }
                }
            }
            None => self.unmatched(Some(key), UnmatchedReason::NoPendingRequest, message),
        }

        Ok(())
    }

    fn unmatched(&mut self, key: Option<String>, reason: UnmatchedReason, message: C::Message) {
        self.stats.record_unmatched();
        warn!(
            peer = %self.peer,
            key = key.as_deref().unwrap_or("<none>"),
            ?reason,
            "Received unmatched message"
        );

        let Some(queue) = &self.unmatched else {
            return;
        };
        let unmatched = UnmatchedMessage {
            key,
            reason,
            message,
        };
        if let Err(e) = queue.try_send(unmatched) {
            let cause = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "receiver dropped",
            };
            warn!(peer = %self.peer, cause, "Dropped unmatched message");
        }
    }
}
