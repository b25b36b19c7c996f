//! Writer Loop
//!
//! Sole owner of the write half. Requests are consumed one at a time in the
//! order they were handed over, registered in the correlation table, then
//! written as a single frame, so writes never interleave and a fast reply can
//! never arrive before its registration.

use crate::lifecycle::{DrainReason, Lifecycle};
use crate::pending::{CorrelationTable, PendingEntry};
use crate::stats::ClientStats;
use crate::ClientError;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One framed request on its way to the socket
pub(crate) struct WriteRequest<M> {
    pub key: String,
    /// Length header followed by the packed message
    pub frame: Bytes,
    pub entry: PendingEntry<M>,
}

pub(crate) struct WriterLoop<W, M> {
    writer: W,
    requests: mpsc::Receiver<WriteRequest<M>>,
    table: Arc<CorrelationTable<M>>,
    lifecycle: Arc<Lifecycle<M>>,
    stats: Arc<ClientStats>,
    shutdown: CancellationToken,
    close_on_write_failure: bool,
    peer: String,
}

impl<W, M> WriterLoop<W, M>
where
    W: AsyncWrite + Unpin + Send + 'static,
    M: Send + 'static,
{
    pub(crate) fn new(
        writer: W,
        requests: mpsc::Receiver<WriteRequest<M>>,
        table: Arc<CorrelationTable<M>>,
        lifecycle: Arc<Lifecycle<M>>,
        stats: Arc<ClientStats>,
        close_on_write_failure: bool,
        peer: String,
    ) -> Self {
        let shutdown = lifecycle.shutdown_token();
        Self {
            writer,
            requests,
            table,
            lifecycle,
            stats,
            shutdown,
            close_on_write_failure,
            peer,
        }
    }

    /// Run until shutdown, then shut the write side down and report how that went
    pub(crate) async fn run(mut self) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();

        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                request = self.requests.recv() => request,
            };
            match request {
                Some(request) => self.write_one(request).await,
                None => break,
            }
        }

        self.reject_queued();
        debug!(peer = %self.peer, "Writer loop exiting");
        self.writer.shutdown().await
    }

    async fn write_one(&mut self, request: WriteRequest<M>) {
        let WriteRequest { key, frame, entry } = request;

        if let Err(rejected) = self.table.insert(key.clone(), entry) {
            let (entry, err) = rejected.into_parts(&key);
            warn!(peer = %self.peer, key = %key, error = %err, "Request not registered");
            entry.fail(err);
            return;
        }

        // checked after registering: a caller that gives up earlier has already
        // looked for its entry and found nothing to remove
        if self.table.take_abandoned(&key).is_some() {
            debug!(peer = %self.peer, key = %key, "Skipping request abandoned before write");
            return;
        }

        // a peer that stops reading must not keep shutdown waiting
        let shutdown = self.shutdown.clone();
        let written = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = self.write_frame(&frame) => Some(result),
        };

        match written {
            Some(Ok(())) => {
                self.stats.record_sent(frame.len());
                debug!(
                    peer = %self.peer,
                    key = %key,
                    bytes = frame.len(),
                    "Sent request frame"
                );
            }
            Some(Err(e)) => {
                self.stats.record_write_failure();
                warn!(peer = %self.peer, key = %key, error = %e, "Failed to write request frame");

                let err = ClientError::write_failure(key.as_str(), e);
                if let Some(entry) = self.table.take(&key) {
                    entry.fail(err.clone());
                }
                // a partial frame leaves the stream unusable for everyone else
                if self.close_on_write_failure {
                    self.lifecycle.begin_drain(DrainReason::WriteFailure(err));
                }
            }
            None => {
                debug!(peer = %self.peer, key = %key, "Write interrupted by shutdown");
                if let Some(entry) = self.table.take(&key) {
                    entry.fail(ClientError::ConnectionClosed);
                }
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await
    }

    /// Fail requests that were handed over but never written
    fn reject_queued(&mut self) {
        self.requests.close();
        let mut rejected = 0usize;
        while let Ok(request) = self.requests.try_recv() {
            request.entry.fail(ClientError::ConnectionClosed);
            rejected += 1;
        }
        if rejected > 0 {
            debug!(peer = %self.peer, rejected, "Rejected queued requests on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_loop() -> WriterLoop<Vec<u8>, String> {
        let table = Arc::new(CorrelationTable::new());
        let stats = Arc::new(ClientStats::default());
        let lifecycle = Arc::new(Lifecycle::new(
            table.clone(),
            stats.clone(),
            "test-peer".to_string(),
        ));
        let (_requests_tx, requests_rx) = mpsc::channel(1);
        WriterLoop::new(
            Vec::new(),
            requests_rx,
            table,
            lifecycle,
            stats,
            true,
            "test-peer".to_string(),
        )
    }

    fn request(key: &str, entry: PendingEntry<String>) -> WriteRequest<String> {
        WriteRequest {
            key: key.to_string(),
            frame: Bytes::from_static(b"\x00\x04\x00\x000800"),
            entry,
        }
    }

    #[tokio::test]
    async fn test_registers_then_writes() {
        let mut writer = writer_loop();
        let (entry, _waiter) = PendingEntry::new();

        writer.write_one(request("000001", entry)).await;

        assert_eq!(writer.table.len(), 1);
        assert_eq!(&writer.writer[..], b"\x00\x04\x00\x000800");
        assert_eq!(writer.stats.snapshot().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_abandoned_request_leaves_no_entry() {
        let mut writer = writer_loop();
        let (entry, waiter) = PendingEntry::new();
        drop(waiter);

        writer.write_one(request("000002", entry)).await;

        assert!(writer.table.is_empty());
        assert!(writer.writer.is_empty());
        assert_eq!(writer.stats.snapshot().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails_request() {
        let mut writer = writer_loop();
        writer.lifecycle.begin_drain(DrainReason::UserClose);
        let (entry, waiter) = PendingEntry::new();

        writer.write_one(request("000003", entry)).await;

        assert!(waiter.wait().await.unwrap_err().is_connection_closed());
        assert!(writer.writer.is_empty());
    }
}
