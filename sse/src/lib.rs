//! Server-Sent Events (SSE) client core for live post updates.
//!
//! This crate keeps one streamed connection per post, fans every event it
//! receives out to the in-process listeners interested in that post, and
//! reports connection health for passive display.
//!
//! # Architecture
//!
//! - **One connection per resource**: the first listener of a post opens its
//!   stream, later listeners share it, and the last one to leave closes it.
//! - **Fan-out**: every frame is delivered synchronously to every listener of
//!   the post, in registration order, from a snapshot taken before the first
//!   listener runs. A failing listener never affects the others.
//! - **Reconnect with backoff**: a dropped stream is retried with exponential
//!   backoff up to a capped number of attempts, after which the connection
//!   reports `error` until it is opened again.
//! - **Push-based status**: each connection publishes a small
//!   `{status, reconnectAttempts}` projection on every change.
//!
//! # Message Flow
//!
//! 1. A consumer calls `Broadcaster::subscribe(post_id, listener)`
//! 2. The first subscription for the post asks the `Manager` to open it
//! 3. The connection task issues `GET {base}/posts/{post_id}/events` with the
//!    caller's bearer token
//! 4. Body chunks are fed to a `FrameDecoder`; each complete record becomes an
//!    `EventFrame`
//! 5. Frames are handed to the `ListenerRegistry`, which calls every listener
//! 6. Status changes are published through the connection's `StatusPublisher`
//!
//! # Example: Subscribing to a post
//!
//! ```rust,ignore
//! use sse::{Backoff, Broadcaster};
//!
//! let broadcaster = Broadcaster::new(transport, Backoff::default());
//! let subscription = broadcaster.subscribe("post-1", |frame| {
//!     println!("{}: {}", frame.kind, frame.payload);
//!     Ok(())
//! });
//!
//! // Later, when the view no longer needs updates
//! subscription.unsubscribe();
//! ```
//!
//! # Modules
//!
//! - `backoff`: exponential reconnect delay policy
//! - `broadcaster`: listener registry, fan-out and subscription tokens
//! - `decoder`: incremental `text/event-stream` decoder
//! - `manager`: per-resource connection lifecycle
//! - `status`: connection health projection
//! - `transport`: streamed HTTP transport and bearer token source

pub mod backoff;
pub mod broadcaster;
mod connection;
pub mod decoder;
pub mod error;
pub mod manager;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use broadcaster::{Broadcaster, ListenerError, Subscription};
pub use error::{Error, ErrorKind};
pub use manager::{FrameSink, Manager};
pub use status::StatusPublisher;
pub use transport::{HttpTransport, HttpTransportConfig, StaticToken, TokenProvider, Transport};
