//! Client Facade
//!
//! The only surface callers see. `send()` fills in a STAN when the request
//! has none, frames the message, hands it to the writer loop and waits for
//! the matching reply, an error, or connection close.

use crate::config::ClientConfig;
use crate::correlation::{CorrelationPolicy, FieldKey};
use crate::lifecycle::{supervise, ConnectionState, DrainReason, Lifecycle};
use crate::pending::{CorrelationTable, PendingEntry, ReplyWaiter};
use crate::reader::{ReaderLoop, UnmatchedMessage};
use crate::stan::StanGenerator;
use crate::stats::{ClientStats, StatsSnapshot};
use crate::writer::{WriteRequest, WriterLoop};
use crate::{ClientError, Result};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use txlink_codec::{CodecError, LengthHeader, Message, MessageCodec, VmlHeader};

/// Assembles a [`Client`] from its collaborators
pub struct ClientBuilder<C: MessageCodec> {
    codec: C,
    header: Arc<dyn LengthHeader>,
    policy: Arc<dyn CorrelationPolicy<C::Message>>,
    config: ClientConfig,
}

impl<C: MessageCodec> ClientBuilder<C> {
    /// VML framing, STAN correlation and default configuration
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            header: Arc::new(VmlHeader),
            policy: Arc::new(FieldKey::default()),
            config: ClientConfig::default(),
        }
    }

    pub fn header(mut self, header: impl LengthHeader) -> Self {
        self.header = Arc::new(header);
        self
    }

    pub fn correlation(mut self, policy: impl CorrelationPolicy<C::Message>) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Dial `address` over TCP and start the connection
    pub async fn connect(self, address: &str) -> Result<Client<C>> {
        info!("Connecting to peer at {}", address);

        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| {
                ClientError::connect(
                    address,
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                )
            })?
            .map_err(|e| ClientError::connect(address, e))?;

        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| address.to_string());
        info!("Connected to peer at {}", peer);

        Ok(self.start(stream, peer))
    }

    /// Start the connection over an already established stream
    ///
    /// Spawns the writer loop, reader loop and their supervisor, so it must be
    /// called from within a tokio runtime.
    pub fn start<S>(self, stream: S, peer: impl Into<String>) -> Client<C>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let ClientBuilder {
            codec,
            header,
            policy,
            config,
        } = self;

        let (read_half, write_half) = tokio::io::split(stream);
        let codec = Arc::new(codec);
        let table = Arc::new(CorrelationTable::new());
        let stats = Arc::new(ClientStats::default());
        let lifecycle = Arc::new(Lifecycle::new(table.clone(), stats.clone(), peer.clone()));

        let (requests_tx, requests_rx) = mpsc::channel(config.write_queue_depth.max(1));
        let (unmatched_tx, unmatched_rx) = if config.unmatched_queue_depth > 0 {
            let (tx, rx) = mpsc::channel(config.unmatched_queue_depth);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let writer = WriterLoop::new(
            write_half,
            requests_rx,
            table.clone(),
            lifecycle.clone(),
            stats.clone(),
            config.close_on_write_failure,
            peer.clone(),
        );
        let reader = ReaderLoop::new(
            BufReader::with_capacity(config.read_buffer_size.max(1), read_half),
            codec.clone(),
            header.clone(),
            policy.clone(),
            table.clone(),
            lifecycle.clone(),
            stats.clone(),
            unmatched_tx,
            config.max_frame_size,
            peer.clone(),
        );

        let writer_task = tokio::spawn(writer.run());
        let reader_task = tokio::spawn(reader.run());
        tokio::spawn(supervise(lifecycle.clone(), writer_task, reader_task));

        debug!(peer = %peer, "Connection loops started");

        Client {
            inner: Arc::new(ClientInner {
                codec,
                header,
                policy,
                config,
                stan: StanGenerator::new(),
                requests: requests_tx,
                table,
                lifecycle,
                stats,
                unmatched: Mutex::new(unmatched_rx),
                peer,
            }),
        }
    }
}

struct ClientInner<C: MessageCodec> {
    codec: Arc<C>,
    header: Arc<dyn LengthHeader>,
    policy: Arc<dyn CorrelationPolicy<C::Message>>,
    config: ClientConfig,
    stan: StanGenerator,
    requests: mpsc::Sender<WriteRequest<C::Message>>,
    table: Arc<CorrelationTable<C::Message>>,
    lifecycle: Arc<Lifecycle<C::Message>>,
    stats: Arc<ClientStats>,
    unmatched: Mutex<Option<mpsc::Receiver<UnmatchedMessage<C::Message>>>>,
    peer: String,
}

impl<C: MessageCodec> Drop for ClientInner<C> {
    fn drop(&mut self) {
        self.lifecycle.begin_drain(DrainReason::ClientDropped);
    }
}

/// Request/response client over one persistent connection
///
/// Cheap to clone; clones share the connection.
pub struct Client<C: MessageCodec> {
    inner: Arc<ClientInner<C>>,
}

impl<C: MessageCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: MessageCodec> Client<C> {
    /// Shorthand for `ClientBuilder::new(codec)`
    pub fn builder(codec: C) -> ClientBuilder<C> {
        ClientBuilder::new(codec)
    }

    /// Send a request and wait for its reply
    ///
    /// Applies `request_timeout_ms` when configured; otherwise waits until the
    /// reply arrives or the connection closes.
    pub async fn send(&self, message: C::Message) -> Result<C::Message> {
        if let Some(timeout) = self.inner.config.request_timeout() {
            return self.send_timeout(message, timeout).await;
        }
        let (request, waiter) = self.prepare(message)?;
        self.hand_off(request).await?;
        waiter.wait().await
    }

    /// Send a request and wait at most `timeout` for its reply
    pub async fn send_timeout(&self, message: C::Message, timeout: Duration) -> Result<C::Message> {
        let (request, waiter) = self.prepare(message)?;
        let key = request.key.clone();

        let exchange = async {
            self.hand_off(request).await?;
            waiter.wait().await
        };

        // the exchange, and with it the waiter, is dropped once this returns
        let outcome = tokio::time::timeout(timeout, exchange).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // if the writer has not registered the entry yet, it finds it
                // abandoned and removes it itself
                if self.inner.table.take_abandoned(&key).is_some() {
                    debug!(peer = %self.inner.peer, key = %key, "Removed timed out request");
                }
                warn!(
                    peer = %self.inner.peer,
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(ClientError::Timeout {
                    key,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Stop accepting requests, fail outstanding ones and wait for both loops
    ///
    /// Idempotent: every call returns the outcome of shutting the transport
    /// down the first time.
    pub async fn close(&self) -> Result<()> {
        self.inner.lifecycle.begin_drain(DrainReason::UserClose);
        self.inner.lifecycle.wait_closed().await;
        self.inner.lifecycle.close_outcome()
    }

    /// Resolves once the connection reaches Closed, whatever the cause
    pub async fn closed(&self) {
        self.inner.lifecycle.wait_closed().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.table.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Receiver for inbound messages that matched no request; handed out once
    pub fn take_unmatched(&self) -> Option<mpsc::Receiver<UnmatchedMessage<C::Message>>> {
        self.inner.unmatched.lock().take()
    }

    fn prepare(
        &self,
        mut message: C::Message,
    ) -> Result<(WriteRequest<C::Message>, ReplyWaiter<C::Message>)> {
        self.inner.lifecycle.ensure_active()?;

        self.assign_stan(&mut message)?;
        let key = self.inner.policy.derive_key(&message)?;

        let payload = self
            .inner
            .codec
            .pack(&message)
            .map_err(ClientError::EncodeFailure)?;
        if payload.len() > self.inner.config.max_frame_size {
            return Err(ClientError::EncodeFailure(CodecError::LengthOutOfRange {
                length: payload.len(),
                max: self.inner.config.max_frame_size,
                header: "max_frame_size",
            }));
        }

        let mut frame = BytesMut::with_capacity(self.inner.header.header_len() + payload.len());
        self.inner
            .header
            .encode(payload.len(), &mut frame)
            .map_err(ClientError::EncodeFailure)?;
        frame.extend_from_slice(&payload);

        let (entry, waiter) = PendingEntry::new();
        Ok((
            WriteRequest {
                key,
                frame: frame.freeze(),
                entry,
            },
            waiter,
        ))
    }

    /// Populate the STAN field when the caller left it empty
    fn assign_stan(&self, message: &mut C::Message) -> Result<()> {
        let field = self.inner.config.stan_field;
        let stan = message.get_field(field).map_err(|e| {
            ClientError::correlation_with_source(format!("getting STAN (field {})", field), e)
        })?;
        if !stan.is_empty() {
            return Ok(());
        }

        let stan = self.inner.stan.next();
        message.set_field(field, &stan).map_err(|e| {
            ClientError::correlation_with_source(
                format!("setting STAN (field {}) to {}", field, stan),
                e,
            )
        })
    }

    /// Single-writer handoff; waits while the writer loop is busy
    ///
    /// Gives up as soon as the connection starts draining, since a stalled
    /// writer may never free a slot.
    async fn hand_off(&self, request: WriteRequest<C::Message>) -> Result<()> {
        let shutdown = self.inner.lifecycle.shutdown_token();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(ClientError::ConnectionClosed),
            sent = self.inner.requests.send(request) => {
                sent.map_err(|_| ClientError::ConnectionClosed)
            }
        }
    }
}
