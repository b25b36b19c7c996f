//! Pending Request Table
//!
//! Maps correlation keys to the callers waiting on them.
//!
//! Flow:
//! 1. `send()` builds a [`PendingEntry`] and keeps the matching [`ReplyWaiter`]
//! 2. The writer loop inserts the entry *before* writing the frame
//! 3. The reader loop takes the entry when a reply with the same key arrives
//! 4. On shutdown the lifecycle manager drains whatever is left and fails it
//!
//! Every entry is consumed by value, so a caller sees exactly one of
//! {reply, error}.

use crate::{ClientError, Result};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Reply and error destinations for one outstanding request
#[derive(Debug)]
pub struct PendingEntry<M> {
    reply: oneshot::Sender<M>,
    error: oneshot::Sender<ClientError>,
    created_at: Instant,
}

impl<M> PendingEntry<M> {
    /// Create an entry together with the waiter its caller blocks on
    pub fn new() -> (Self, ReplyWaiter<M>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        (
            Self {
                reply: reply_tx,
                error: error_tx,
                created_at: Instant::now(),
            },
            ReplyWaiter {
                reply: reply_rx,
                error: error_rx,
            },
        )
    }

    /// Deliver the reply; hands the message back if the caller stopped waiting
    pub fn resolve(self, message: M) -> std::result::Result<(), M> {
        self.reply.send(message)
    }

    /// Deliver an error; returns false if the caller stopped waiting
    pub fn fail(self, error: ClientError) -> bool {
        self.error.send(error).is_ok()
    }

    /// Caller dropped its waiter (timed out or cancelled)
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Caller side of a [`PendingEntry`]
#[derive(Debug)]
pub struct ReplyWaiter<M> {
    reply: oneshot::Receiver<M>,
    error: oneshot::Receiver<ClientError>,
}

impl<M> ReplyWaiter<M> {
    /// Wait for the first of {reply, error}
    ///
    /// An entry dropped without being resolved (its loop went away) reads as
    /// [`ClientError::ConnectionClosed`].
    pub async fn wait(self) -> Result<M> {
        let ReplyWaiter {
            mut reply,
            mut error,
        } = self;

        tokio::select! {
            biased;
            Ok(message) = &mut reply => Ok(message),
            Ok(err) = &mut error => Err(err),
            else => Err(ClientError::ConnectionClosed),
        }
    }
}

/// Why an insert was refused; the entry is handed back so its caller can be failed
#[derive(Debug)]
pub enum InsertRejected<M> {
    /// A live request already holds the key
    Duplicate(PendingEntry<M>),
    /// The table was drained for shutdown
    Sealed(PendingEntry<M>),
}

impl<M> InsertRejected<M> {
    /// Split into the rejected entry and the error its caller should see
    pub fn into_parts(self, key: &str) -> (PendingEntry<M>, ClientError) {
        match self {
            Self::Duplicate(entry) => (
                entry,
                ClientError::DuplicateKey {
                    key: key.to_string(),
                },
            ),
            Self::Sealed(entry) => (entry, ClientError::ConnectionClosed),
        }
    }
}

struct TableInner<M> {
    entries: HashMap<String, PendingEntry<M>>,
    sealed: bool,
}

/// Correlation table shared by the writer loop, reader loop and lifecycle manager
///
/// All operations run under one short-held lock.
pub struct CorrelationTable<M> {
    inner: Mutex<TableInner<M>>,
}

impl<M> Default for CorrelationTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> CorrelationTable<M> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                sealed: false,
            }),
        }
    }

    /// Register an entry under `key`
    ///
    /// A live entry under the same key is never overwritten. An abandoned one
    /// (its caller timed out) is replaced.
    pub fn insert(
        &self,
        key: String,
        entry: PendingEntry<M>,
    ) -> std::result::Result<(), InsertRejected<M>> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(InsertRejected::Sealed(entry));
        }
        match inner.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_abandoned() {
                    occupied.insert(entry);
                    Ok(())
                } else {
                    Err(InsertRejected::Duplicate(entry))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Look up and remove in one step
    pub fn take(&self, key: &str) -> Option<PendingEntry<M>> {
        self.inner.lock().entries.remove(key)
    }

    /// Remove the entry under `key` only if its caller has stopped waiting
    pub fn take_abandoned(&self, key: &str) -> Option<PendingEntry<M>> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.is_abandoned() => inner.entries.remove(key),
            _ => None,
        }
    }

    /// Remove everything and refuse further inserts
    pub fn drain_all(&self) -> Vec<(String, PendingEntry<M>)> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        inner.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_take_resolve() {
        let table = CorrelationTable::<String>::new();
        let (entry, waiter) = PendingEntry::new();

        assert!(table.insert("000001".to_string(), entry).is_ok());
        assert_eq!(table.len(), 1);

        let entry = table.take("000001").unwrap();
        assert!(table.take("000001").is_none());
        entry.resolve("reply".to_string()).unwrap();

        assert_eq!(waiter.wait().await.unwrap(), "reply");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_live_key_rejected() {
        let table = CorrelationTable::<String>::new();
        let (first, first_waiter) = PendingEntry::new();
        let (second, second_waiter) = PendingEntry::new();

        table.insert("000007".to_string(), first).unwrap();
        let rejected = table.insert("000007".to_string(), second).unwrap_err();
        let (entry, err) = rejected.into_parts("000007");
        assert!(matches!(err, ClientError::DuplicateKey { ref key } if key == "000007"));
        entry.fail(err);

        assert!(matches!(
            second_waiter.wait().await,
            Err(ClientError::DuplicateKey { .. })
        ));

        // the original entry is untouched
        table.take("000007").unwrap().resolve("ok".to_string()).unwrap();
        assert_eq!(first_waiter.wait().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_abandoned_key_is_replaced() {
        let table = CorrelationTable::<String>::new();
        let (stale, stale_waiter) = PendingEntry::new();
        table.insert("000009".to_string(), stale).unwrap();
        drop(stale_waiter);

        let (fresh, fresh_waiter) = PendingEntry::new();
        assert!(table.insert("000009".to_string(), fresh).is_ok());
        table.take("000009").unwrap().resolve("fresh".to_string()).unwrap();
        assert_eq!(fresh_waiter.wait().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_take_abandoned_leaves_live_entries() {
        let table = CorrelationTable::<String>::new();
        let (live, _live_waiter) = PendingEntry::new();
        table.insert("000001".to_string(), live).unwrap();
        assert!(table.take_abandoned("000001").is_none());
        assert_eq!(table.len(), 1);

        let (gone, gone_waiter) = PendingEntry::new();
        table.insert("000002".to_string(), gone).unwrap();
        drop(gone_waiter);
        assert!(table.take_abandoned("000002").is_some());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_seals_table() {
        let table = CorrelationTable::<String>::new();
        let (entry, waiter) = PendingEntry::new();
        table.insert("000003".to_string(), entry).unwrap();

        let drained = table.drain_all();
        assert_eq!(drained.len(), 1);
        for (_, entry) in drained {
            assert!(entry.fail(ClientError::ConnectionClosed));
        }
        assert!(matches!(waiter.wait().await, Err(ClientError::ConnectionClosed)));

        let (late, late_waiter) = PendingEntry::new();
        let (late, err) = table.insert("000004".to_string(), late).unwrap_err().into_parts("000004");
        assert!(err.is_connection_closed());
        late.fail(err);
        assert!(late_waiter.wait().await.unwrap_err().is_connection_closed());
        assert!(table.is_sealed());
    }

    #[tokio::test]
    async fn test_dropped_entry_reads_as_closed() {
        let (entry, waiter) = PendingEntry::<String>::new();
        drop(entry);
        assert!(matches!(waiter.wait().await, Err(ClientError::ConnectionClosed)));
    }
}
