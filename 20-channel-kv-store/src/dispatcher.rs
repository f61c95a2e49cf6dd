//! Single-worker access serialization for the [`Store`].
//!
//! The dispatcher task owns the store by value. Callers never touch it;
//! they hold a cloneable [`StoreHandle`] that turns each method call into a
//! `Request` carrying a fresh oneshot reply slot, queues it on one mpsc
//! channel, and waits for the answer.
//!
//! ```text
//!   handler ─┐
//!   handler ─┼─ mpsc<Request> ──► Dispatcher (owns Store) ──► oneshot reply
//!   handler ─┘
//! ```
//!
//! The worker pulls one request, runs the store call to completion, sends
//! the reply, and only then looks at the queue again. Operations of every
//! kind therefore interleave only at request boundaries, and since the
//! queue is FIFO they execute in the order they were enqueued.

use std::fmt;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{DispatchError, StoreError};
use crate::store::{Entries, Store};

/// Default number of requests that may wait in the queue before submitters
/// start waiting for room.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// The closed set of operation classes the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Add,
    GetAll,
    Exists,
    Count,
    Clear,
    Delete,
    Update,
    Upsert,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Get,
        Operation::Add,
        Operation::GetAll,
        Operation::Exists,
        Operation::Count,
        Operation::Clear,
        Operation::Delete,
        Operation::Update,
        Operation::Upsert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Add => "add",
            Operation::GetAll => "get_all",
            Operation::Exists => "exists",
            Operation::Count => "count",
            Operation::Clear => "clear",
            Operation::Delete => "delete",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// One queued operation together with the slot its result goes back on.
///
/// A oneshot sender is consumed by `send`, so each request is answered at
/// most once, and dropping it unanswered closes the caller's receiver.
enum Request {
    Get {
        key: String,
        respond_to: Reply<Value>,
    },
    Add {
        key: String,
        payload: Vec<u8>,
        respond_to: Reply<Value>,
    },
    GetAll {
        respond_to: oneshot::Sender<Entries>,
    },
    Exists {
        key: String,
        respond_to: oneshot::Sender<bool>,
    },
    Count {
        respond_to: oneshot::Sender<usize>,
    },
    Clear {
        respond_to: oneshot::Sender<Entries>,
    },
    Delete {
        key: String,
        respond_to: Reply<()>,
    },
    Update {
        key: String,
        payload: Vec<u8>,
        respond_to: Reply<Value>,
    },
    Upsert {
        key: String,
        payload: Vec<u8>,
        respond_to: Reply<Value>,
    },
}

impl Request {
    fn operation(&self) -> Operation {
        match self {
            Request::Get { .. } => Operation::Get,
            Request::Add { .. } => Operation::Add,
            Request::GetAll { .. } => Operation::GetAll,
            Request::Exists { .. } => Operation::Exists,
            Request::Count { .. } => Operation::Count,
            Request::Clear { .. } => Operation::Clear,
            Request::Delete { .. } => Operation::Delete,
            Request::Update { .. } => Operation::Update,
            Request::Upsert { .. } => Operation::Upsert,
        }
    }
}

/// Handle for submitting operations to a running dispatcher.
///
/// Cheap to clone; every HTTP handler gets its own copy through the router
/// state. The dispatcher stops once the last handle is dropped.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    request_tx: mpsc::Sender<Request>,
}

impl StoreHandle {
    /// Queues a request built around a fresh reply slot and waits for the
    /// reply.
    ///
    /// Dropping the returned future after the request was queued does not
    /// retract it: the dispatcher still applies the operation and its reply
    /// is discarded.
    async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, DispatchError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.request_tx
            .send(build(resp_tx))
            .await
            .map_err(|_| DispatchError::Unavailable)?;
        resp_rx.await.map_err(|_| DispatchError::Unavailable)
    }

    pub async fn get(&self, key: impl Into<String>) -> Result<Value, DispatchError> {
        let key = key.into();
        self.submit(move |respond_to| Request::Get { key, respond_to })
            .await?
            .map_err(DispatchError::from)
    }

    /// Inserts `payload` (raw JSON) under a key that must not exist yet.
    pub async fn add(
        &self,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Value, DispatchError> {
        let (key, payload) = (key.into(), payload.into());
        self.submit(move |respond_to| Request::Add {
            key,
            payload,
            respond_to,
        })
        .await?
        .map_err(DispatchError::from)
    }

    /// Returns an owned copy of every entry.
    pub async fn get_all(&self) -> Result<Entries, DispatchError> {
        self.submit(|respond_to| Request::GetAll { respond_to }).await
    }

    pub async fn exists(&self, key: impl Into<String>) -> Result<bool, DispatchError> {
        let key = key.into();
        self.submit(move |respond_to| Request::Exists { key, respond_to })
            .await
    }

    pub async fn count(&self) -> Result<usize, DispatchError> {
        self.submit(|respond_to| Request::Count { respond_to }).await
    }

    /// Empties the store and returns what is left of it (always empty).
    pub async fn clear(&self) -> Result<Entries, DispatchError> {
        self.submit(|respond_to| Request::Clear { respond_to }).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> Result<(), DispatchError> {
        let key = key.into();
        self.submit(move |respond_to| Request::Delete { key, respond_to })
            .await?
            .map_err(DispatchError::from)
    }

    /// Overwrites the value of an existing key.
    pub async fn update(
        &self,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Value, DispatchError> {
        let (key, payload) = (key.into(), payload.into());
        self.submit(move |respond_to| Request::Update {
            key,
            payload,
            respond_to,
        })
        .await?
        .map_err(DispatchError::from)
    }

    /// Inserts or overwrites regardless of whether the key exists.
    pub async fn upsert(
        &self,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Value, DispatchError> {
        let (key, payload) = (key.into(), payload.into());
        self.submit(move |respond_to| Request::Upsert {
            key,
            payload,
            respond_to,
        })
        .await?
        .map_err(DispatchError::from)
    }
}

/// The worker that owns the store and applies requests one at a time.
pub struct Dispatcher {
    store: Store,
    request_rx: mpsc::Receiver<Request>,
    served: u64,
}

impl Dispatcher {
    /// Creates a dispatcher for `store` without starting it.
    ///
    /// Requests sent through the returned handle wait in the queue until
    /// [`Dispatcher::run`] is polled.
    pub fn new(store: Store, capacity: usize) -> (StoreHandle, Self) {
        let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
        let dispatcher = Dispatcher {
            store,
            request_rx,
            served: 0,
        };
        (StoreHandle { request_tx }, dispatcher)
    }

    /// Moves `store` into a new dispatcher task and returns a handle to it.
    ///
    /// The join handle resolves to the store once every [`StoreHandle`] has
    /// been dropped and the queue is drained.
    pub fn spawn(store: Store, capacity: usize) -> (StoreHandle, JoinHandle<Store>) {
        let (handle, dispatcher) = Self::new(store, capacity);
        (handle, tokio::spawn(dispatcher.run()))
    }

    /// Applies queued requests one at a time until every handle is gone,
    /// then gives the store back.
    pub async fn run(mut self) -> Store {
        info!(entries = self.store.count(), "store dispatcher started");
        while let Some(request) = self.request_rx.recv().await {
            self.handle(request);
        }
        info!(
            served = self.served,
            entries = self.store.count(),
            "store dispatcher stopped"
        );
        self.store
    }

    fn handle(&mut self, request: Request) {
        let op = request.operation();
        self.served += 1;

        let delivered = match request {
            Request::Get { key, respond_to } => respond_to.send(self.store.get(&key)).is_ok(),
            Request::Add {
                key,
                payload,
                respond_to,
            } => respond_to.send(self.store.add(&key, &payload)).is_ok(),
            Request::GetAll { respond_to } => respond_to.send(self.store.get_all().clone()).is_ok(),
            Request::Exists { key, respond_to } => respond_to.send(self.store.exists(&key)).is_ok(),
            Request::Count { respond_to } => respond_to.send(self.store.count()).is_ok(),
            Request::Clear { respond_to } => respond_to.send(self.store.clear().clone()).is_ok(),
            Request::Delete { key, respond_to } => respond_to.send(self.store.delete(&key)).is_ok(),
            Request::Update {
                key,
                payload,
                respond_to,
            } => respond_to.send(self.store.update(&key, &payload)).is_ok(),
            Request::Upsert {
                key,
                payload,
                respond_to,
            } => respond_to.send(self.store.upsert(&key, &payload)).is_ok(),
        };

        if !delivered {
            debug!(%op, "caller stopped waiting, reply discarded");
        }
    }
}
