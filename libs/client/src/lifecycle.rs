//! Connection Lifecycle
//!
//! ```text
//! Active ──(close() | reader/writer terminates | client dropped)──► Draining
//! Draining ──(both loops joined)──► Closed
//! ```
//!
//! Entering Draining cancels the shutdown token both loops observe, seals
//! the correlation table and fails every entry still in it with
//! [`ClientError::ConnectionClosed`]. Closed is terminal.

use crate::pending::CorrelationTable;
use crate::stats::ClientStats;
use crate::{ClientError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting requests, both loops running
    Active,
    /// No new requests; loops finishing up
    Draining,
    /// Transport shut down, loops exited, table empty
    Closed,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }
}

/// What moved the connection out of Active
#[derive(Debug, Clone)]
pub enum DrainReason {
    UserClose,
    ClientDropped,
    PeerClosed,
    ReadFailure(ClientError),
    WriteFailure(ClientError),
    LoopsExited,
}

pub(crate) struct Lifecycle<M> {
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    table: Arc<CorrelationTable<M>>,
    stats: Arc<ClientStats>,
    close_outcome: Mutex<Option<Result<()>>>,
    peer: String,
}

impl<M> Lifecycle<M> {
    pub(crate) fn new(table: Arc<CorrelationTable<M>>, stats: Arc<ClientStats>, peer: String) -> Self {
        let (state, _) = watch::channel(ConnectionState::Active);
        Self {
            state,
            shutdown: CancellationToken::new(),
            table,
            stats,
            close_outcome: Mutex::new(None),
            peer,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.state().is_active() {
            Ok(())
        } else {
            Err(ClientError::ConnectionClosed)
        }
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Move Active → Draining and fail everything still pending
    ///
    /// Returns false if the connection was already draining or closed.
    pub(crate) fn begin_drain(&self, reason: DrainReason) -> bool {
        let entered = self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = ConnectionState::Draining;
                true
            } else {
                false
            }
        });
        if !entered {
            debug!(peer = %self.peer, ?reason, "Drain already in progress");
            return false;
        }

        match &reason {
            DrainReason::UserClose | DrainReason::ClientDropped => {
                info!(peer = %self.peer, ?reason, "Connection draining")
            }
            _ => warn!(peer = %self.peer, ?reason, "Connection draining after failure"),
        }

        self.shutdown.cancel();

        let drained = self.table.drain_all();
        if !drained.is_empty() {
            info!(
                peer = %self.peer,
                pending = drained.len(),
                "Failing outstanding requests"
            );
        }
        self.stats.record_drained(drained.len());
        for (key, entry) in drained {
            if !entry.fail(ClientError::ConnectionClosed) {
                debug!(peer = %self.peer, key = %key, "Drained request had no waiting caller");
            }
        }
        true
    }

    pub(crate) fn mark_closed(&self, outcome: Result<()>) {
        *self.close_outcome.lock() = Some(outcome);
        self.state.send_replace(ConnectionState::Closed);
        info!(peer = %self.peer, "Connection closed");
    }

    pub(crate) fn close_outcome(&self) -> Result<()> {
        self.close_outcome.lock().clone().unwrap_or(Ok(()))
    }

    pub(crate) async fn wait_closed(&self) {
        let mut state = self.state.subscribe();
        // the sender lives in self, so the channel cannot close under us
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

/// Join both loops, then record the transport shutdown outcome and enter Closed
pub(crate) async fn supervise<M>(
    lifecycle: Arc<Lifecycle<M>>,
    writer: JoinHandle<std::io::Result<()>>,
    reader: JoinHandle<()>,
) {
    let (written, read) = tokio::join!(writer, reader);

    let outcome = match written {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ClientError::io("shutting down transport", e)),
        Err(join_error) => {
            error!(peer = %lifecycle.peer, error = %join_error, "Writer loop aborted");
            Err(ClientError::io(
                "writer loop aborted",
                std::io::Error::new(std::io::ErrorKind::Other, join_error.to_string()),
            ))
        }
    };
    if let Err(join_error) = read {
        error!(peer = %lifecycle.peer, error = %join_error, "Reader loop aborted");
    }

    lifecycle.begin_drain(DrainReason::LoopsExited);
    lifecycle.mark_closed(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingEntry;

    fn lifecycle() -> Lifecycle<String> {
        Lifecycle::new(
            Arc::new(CorrelationTable::new()),
            Arc::new(ClientStats::default()),
            "test-peer".to_string(),
        )
    }

    #[tokio::test]
    async fn test_drain_fails_pending_and_cancels() {
        let lifecycle = lifecycle();
        let (entry, waiter) = PendingEntry::new();
        lifecycle.table.insert("000001".to_string(), entry).unwrap();
        let token = lifecycle.shutdown_token();

        assert!(lifecycle.ensure_active().is_ok());
        assert!(lifecycle.begin_drain(DrainReason::UserClose));

        assert_eq!(lifecycle.state(), ConnectionState::Draining);
        assert!(token.is_cancelled());
        assert!(waiter.wait().await.unwrap_err().is_connection_closed());
        assert!(lifecycle.ensure_active().unwrap_err().is_connection_closed());
        assert_eq!(lifecycle.stats.snapshot().drained, 1);
    }

    #[tokio::test]
    async fn test_second_drain_is_noop() {
        let lifecycle = lifecycle();
        assert!(lifecycle.begin_drain(DrainReason::PeerClosed));
        assert!(!lifecycle.begin_drain(DrainReason::UserClose));
        lifecycle.mark_closed(Ok(()));
        assert!(!lifecycle.begin_drain(DrainReason::UserClose));
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_outcome_is_sticky() {
        let lifecycle = lifecycle();
        lifecycle.begin_drain(DrainReason::UserClose);
        lifecycle.mark_closed(Err(ClientError::io(
            "shutting down transport",
            std::io::Error::new(std::io::ErrorKind::NotConnected, "gone"),
        )));
        lifecycle.wait_closed().await;

        assert!(matches!(lifecycle.close_outcome(), Err(ClientError::Io { .. })));
        assert!(matches!(lifecycle.close_outcome(), Err(ClientError::Io { .. })));
    }
}
