//! Connection pipelines on top of the reactor.
//!
//! Every socket feeds a chain of [`Connection`](crate::Connection)s. The
//! reactor owns the socket and talks to the outermost link; each
//! [`Filter`](filter::Filter) in between sees traffic in both directions
//! and may transform it.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │                 (Connection implementation)                 │
//! └────────────▲──────────────────────┬─────────────────────────┘
//!              │ on_recv/on_connect   │ send/disconnect
//!              │ on_queue/on_disconnect
//! ┌────────────┴──────────────────────▼─────────────────────────┐
//! │                Filters (framing, dump, ...)                 │
//! └────────────▲──────────────────────┬─────────────────────────┘
//!              │                      │
//! ┌────────────┴──────────────────────▼─────────────────────────┐
//! │                     Reactor (tcp module)                    │
//! │  ┌──────────┐      ┌──────────────┐     ┌───────────────┐   │
//! │  │ Poll     │────▶│ SocketBinding │───▶│ write queue   │   │
//! │  │ (mio)    │      │ per token     │     │ (ByteQueue)   │   │
//! │  └──────────┘      └──────────────┘     └───────────────┘   │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ OS Events
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Operating System (epoll/kqueue/IOCP)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{cell::OnceCell, rc::Rc};
//! use mill_reactor::{
//!     attach, Connection, ConnectionHandler, FixedSize, FramingFilter, Reactor,
//! };
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
//!     fn on_recv(&self, frame: &[u8]) {
//!         if let Some(handler) = self.handler.get() {
//!             handler.send(frame);
//!         }
//!     }
//! }
//!
//! # fn main() -> mill_reactor::Result<()> {
//! let reactor = Reactor::new()?;
//! reactor.add_listener(
//!     || attach(Rc::new(Echo::default()), FramingFilter::new(FixedSize(4))),
//!     "127.0.0.1:8080".parse().unwrap(),
//! )?;
//! reactor.run_forever()?;
//! # Ok(())
//! # }
//! ```

pub mod filter;
pub mod framing;
pub mod tcp;
