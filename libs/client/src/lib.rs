//! # txlink Client
//!
//! Persistent-connection client for length-prefixed request/response
//! networks where many exchanges share one socket and replies are matched to
//! requests by a key carried inside the message (the STAN by default).
//!
//! ## Architecture
//!
//! ```text
//! caller ─► Client::send ─► writer loop (register, then write) ─► socket
//!                                   │                               │
//!                           correlation table ◄── reader loop ◄─────┘
//!                                   │
//! caller ◄──────── reply | error ◄──┘
//! ```
//!
//! - [`Client`]: facade; assigns STANs, frames messages, waits for replies
//! - [`CorrelationTable`]: key → pending caller, one lock, no overwrites
//! - [`StanGenerator`]: wrapping six-digit sequence
//! - [`ConnectionState`]: Active → Draining → Closed
//!
//! ## Example
//!
//! ```no_run
//! use txlink_client::{ClientBuilder, ClientConfig};
//! use txlink_codec::{FieldCodec, FieldMessage, VmlHeader};
//!
//! # async fn example() -> txlink_client::Result<()> {
//! let client = ClientBuilder::new(FieldCodec)
//!     .header(VmlHeader)
//!     .config(ClientConfig::default())
//!     .connect("127.0.0.1:8583")
//!     .await?;
//!
//! let reply = client.send(FieldMessage::new("0800").with_field(70, "301")).await?;
//! println!("echo reply: {:?}", reply);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod lifecycle;
pub mod pending;
pub mod reader;
pub mod stan;
pub mod stats;
mod writer;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use correlation::{CompositeKey, CorrelationPolicy, FieldKey};
pub use error::{ClientError, Result};
pub use lifecycle::{ConnectionState, DrainReason};
pub use pending::{CorrelationTable, InsertRejected, PendingEntry, ReplyWaiter};
pub use reader::{UnmatchedMessage, UnmatchedReason};
pub use stan::{StanGenerator, MAX_STAN};
pub use stats::{ClientStats, StatsSnapshot};
