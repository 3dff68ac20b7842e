//! Gateway Transport Layer
//!
//! Provides the HTTP entrypoint for the gateway. The transport layer handles:
//! - Tenant resolution (credential and vault route) before any dispatch
//! - One [`TransportSession`] per request, closed on every exit path
//! - Isolation of each dispatch in its own task
//! - Health reporting
//!
//! The transport is decoupled from the dispatch logic via the `RequestHandler` trait.

mod body;
pub mod server;
pub mod session;

pub use server::{RequestHandler, TransportConfig, TransportError, TransportServer};
pub use session::{CloseReason, SessionCounter, SessionObserver, SessionState, TransportSession};
