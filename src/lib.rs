//! # Mill-Reactor
//! A small single-threaded event loop for non-blocking TCP services, built on
//! top of [`mio`] without an async runtime.
//!
//! One [`Reactor`] per thread owns its sockets, listeners and timers.
//! Applications plug in as [`Connection`] pipelines, optionally wrapped in
//! [`Filter`] layers such as [`FramingFilter`]. Other threads reach the loop
//! through a [`Remote`].
//! ## Features
//! - **Edge-triggered readiness**: every socket is drained until it would block
//! - **Backpressure**: unsent output is queued per socket and reported through `on_queue`
//! - **Graceful close**: `disconnect` flushes everything already sent first
//! - **Timers**: one-shot and periodic tasks ordered by deadline, then scheduling order
//! - **Cross-thread tasks**: a lock-free queue plus a poll waker
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │   Remote    │───▶│   Reactor    │───▶│ PollHandle  │
//! └─────────────┘    └──────────────┘    └─────────────┘
//!                      │          │
//!                      ▼          ▼
//!           ┌──────────────┐  ┌──────────────┐    ┌─────────────┐
//!           │ TimerQueue   │  │ SocketBinding│───▶│ Connection  │
//!           └──────────────┘  └──────────────┘    │  pipeline   │
//!                                                 └─────────────┘
//! ```
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{cell::OnceCell, rc::Rc};
//! use mill_reactor::{Connection, ConnectionHandler, Reactor};
//!
//! #[derive(Default)]
//! struct Echo {
//!     handler: OnceCell<Rc<dyn ConnectionHandler>>,
//! }
//!
//! impl Connection for Echo {
//!     fn set_handler(&self, handler: Rc<dyn ConnectionHandler>) {
//!         let _ = self.handler.set(handler);
//!     }
//!
//!     fn on_recv(&self, data: &[u8]) {
//!         if let Some(handler) = self.handler.get() {
//!             handler.send(data);
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reactor = Reactor::new()?;
//!     let listener = reactor.add_listener(
//!         || Rc::new(Echo::default()) as Rc<dyn Connection>,
//!         "127.0.0.1:8080".parse()?,
//!     )?;
//!     println!("listening on {}", listener.local_addr());
//!     reactor.run_forever()?;
//!     Ok(())
//! }
//! ```
//!
//! - [`Reactor`]: the loop, its listeners, sockets and timers
//! - [`Connection`] / [`ConnectionHandler`]: the two halves of a pipeline
//! - [`net::filter`]: stacking protocol layers
//! - [`net::framing`]: length-delimited frames
//! - [`Remote`]: posting work from other threads
//! - [`error`]: error types and result handling

pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod net;
pub(crate) mod poll;
pub mod reactor;
pub mod remote;
pub mod thread_pool;
pub mod timer;

pub use buffer::ByteQueue;
pub use config::{ReactorConfig, ReactorConfigBuilder};
pub use error::{NetworkError, Result};
pub use event::Readiness;
pub use handler::{Connection, ConnectionHandler, ConnectionId, ListenerId};
pub use net::filter::{attach, Context, DumpFilter, Filter, PassThrough};
pub use net::framing::{
    FixedSize, FramingError, FramingFilter, LengthField, LengthPrefixed, SizeDetector,
};
pub use net::tcp::Listener;
pub use reactor::Reactor;
pub use remote::{LoopTask, Remote};
pub use timer::TimerHandle;

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_reactor::prelude::*;
/// ```
///
/// This brings into scope:
/// - [`Reactor`] and [`Remote`] - the loop and its cross-thread handle
/// - [`Connection`] and [`ConnectionHandler`] - pipeline traits
/// - [`Filter`], [`Context`] and [`attach`] - filter layers
/// - [`FramingFilter`] and its size detectors
pub mod prelude {
    pub use crate::handler::{Connection, ConnectionHandler, ConnectionId};
    pub use crate::net::filter::{attach, Context, Filter};
    pub use crate::net::framing::{FixedSize, FramingFilter, LengthField, LengthPrefixed};
    pub use crate::reactor::Reactor;
    pub use crate::remote::Remote;
    pub use crate::timer::TimerHandle;
}
