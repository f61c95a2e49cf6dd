use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::TcpListener,
    select,
    sync::oneshot,
    task::{JoinError, JoinHandle},
    time::timeout,
};
use tracing::{info, warn};

use crate::cli::ServerConfig;
use crate::dispatcher::{Dispatcher, StoreHandle};
use crate::http::{self, AppState};
use crate::seed;
use crate::store::Store;

/// A bound HTTP listener plus the dispatcher that owns the store.
///
/// Everything is constructed explicitly in [`Server::bind`]; nothing lives
/// in process-wide statics.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: StoreHandle,
    dispatcher: JoinHandle<Store>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::bind_with_store(config, Store::new()).await
    }

    /// Binds the listener and hands `store` to a freshly spawned dispatcher.
    pub async fn bind_with_store(config: ServerConfig, store: Store) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let (handle, dispatcher) = Dispatcher::spawn(store, config.queue_capacity);
        Ok(Self {
            listener,
            config,
            store: handle,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Another handle onto the same dispatcher the HTTP routes use.
    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    /// Serves requests until `shutdown` resolves, then lets in-flight
    /// requests finish for at most the configured grace period.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            config,
            store,
            dispatcher,
        } = self;
        tokio::pin!(shutdown);

        let addr = listener.local_addr()?;
        let app = http::router(
            AppState::new(store.clone()),
            &config.base_path,
            config.request_timeout,
        );
        info!(base_path = %config.base_path, "listening on {addr}");

        let seeding = spawn_seeding(&store, config.seed);
        drop(store);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        });
        let mut serving = tokio::spawn(async move { serve.await });

        let served: Result<()> = select! {
            _ = &mut shutdown => {
                info!("shutting down");
                let _ = stop_tx.send(());
                match timeout(config.shutdown_grace, &mut serving).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        let grace = config.shutdown_grace;
                        warn!(?grace, "in-flight requests did not finish in time");
                        serving.abort();
                        Ok(())
                    }
                }
            }
            joined = &mut serving => flatten(joined),
        };
        if let Err(err) = &served {
            warn!(error = %err, "http server stopped with an error");
        }

        let stopped = wind_down(seeding, dispatcher, config.shutdown_grace).await;
        served?;
        if let Some(store) = stopped? {
            info!(entries = store.count(), "server stopped");
        }
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn flatten(joined: Result<std::io::Result<()>, JoinError>) -> Result<()> {
    joined
        .context("http server task failed")?
        .context("http server failed")
}

/// Stops seeding and waits up to `grace` for the dispatcher to hand the
/// store back. `None` means some handle outlived the wait.
async fn wind_down(
    seeding: Option<JoinHandle<()>>,
    dispatcher: JoinHandle<Store>,
    grace: Duration,
) -> Result<Option<Store>> {
    if let Some(task) = seeding {
        task.abort();
    }
    match timeout(grace, dispatcher).await {
        Ok(joined) => Ok(Some(joined.context("store dispatcher task failed")?)),
        Err(_) => {
            warn!("store dispatcher still has live handles, not waiting for it");
            Ok(None)
        }
    }
}

fn spawn_seeding(store: &StoreHandle, pairs: usize) -> Option<JoinHandle<()>> {
    if pairs == 0 {
        return None;
    }
    let store = store.clone();
    Some(tokio::spawn(async move {
        if let Err(err) = seed::seed(&store, pairs).await {
            warn!(error = %err, "seeding stopped early");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wind_down_stops_seeding_and_returns_store() {
        let (store, dispatcher) = Dispatcher::spawn(Store::new(), 8);
        let seeding = spawn_seeding(&store, 1_000_000);
        assert!(seeding.is_some());
        drop(store);

        let stopped = wind_down(seeding, dispatcher, Duration::from_secs(5))
            .await
            .expect("dispatcher joined");
        let store = stopped.expect("every handle released");
        assert!(store.count() < 1_000_000);
    }

    #[tokio::test]
    async fn wind_down_gives_up_while_a_handle_is_alive() {
        let (store, dispatcher) = Dispatcher::spawn(Store::new(), 8);
        let stopped = wind_down(None, dispatcher, Duration::from_millis(20))
            .await
            .expect("no join error");
        assert!(stopped.is_none());
        drop(store);
    }

    #[test]
    fn no_seeding_task_without_pairs() {
        let (store, _dispatcher) = Dispatcher::new(Store::new(), 1);
        assert!(spawn_seeding(&store, 0).is_none());
    }
}
