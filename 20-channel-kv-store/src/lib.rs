//! Key/value store shared between concurrent HTTP requests without locks.
//!
//! The map itself has no synchronization. A single dispatcher task owns it
//! and applies operations one at a time; everyone else talks to that task
//! through a cloneable handle and per-request oneshot replies.
//!
//! - [`store`] is the plain map and its nine primitive operations.
//! - [`dispatcher`] owns the store and serializes access to it.
//! - [`error`] defines store, dispatch and HTTP error types.
//! - [`http`] maps routes under `/kvs` onto dispatcher calls.
//! - [`server`] wires listener, dispatcher and router together and handles
//!   graceful shutdown.
//! - [`cli`] parses flags and environment into a [`cli::ServerConfig`].
//! - [`seed`] fills the store with demo entries.

pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod seed;
pub mod server;
pub mod store;

pub use dispatcher::{Dispatcher, Operation, StoreHandle};
pub use error::{ApiError, DispatchError, StoreError};
pub use store::{Entries, Store};
