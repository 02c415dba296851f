//! Server assembly: replicas, dispatcher, router, listener.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::api::InferenceApi;
use crate::auth::{authenticator_for, Authenticator};
use crate::client_stub::generate_client_file;
use crate::config::ServerConfig;
use crate::gateway::{request_queue, ChannelPool, Dispatcher, QueueReceiver, RequestTable};
use crate::worker::{assign_replicas, resolve_devices, spawn_replica, ReplicaHandle};
use crate::{routes, AppState};

pub struct Server<A> {
    api: A,
    config: ServerConfig,
    authenticator: Arc<dyn Authenticator>,
}

impl<A: InferenceApi + Clone> Server<A> {
    /// Every replica gets its own clone of `api`.
    pub fn new(api: A, config: ServerConfig) -> Self {
        let authenticator = authenticator_for(config.api_key.as_deref());
        Self {
            api,
            config,
            authenticator,
        }
    }

    /// Replace the API key check with a custom policy.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Spawn the replicas and build the router, without binding a socket.
    pub fn start(self) -> io::Result<RunningServer> {
        let Server {
            api,
            config,
            authenticator,
        } = self;

        let table = RequestTable::new();
        let (queue_tx, queue_rx) = request_queue(config.max_queue_size);
        let devices = resolve_devices(config.accelerator, &config.devices);
        let slots = assign_replicas(&devices, config.workers_per_device);
        let settings = config.worker_settings();

        if slots.is_empty() {
            tracing::warn!("No replicas configured; every request will time out");
        }

        let mut replicas = Vec::with_capacity(slots.len());
        for slot in slots {
            tracing::debug!(worker_id = slot.worker_id, device = %slot.device, "Spawning replica");
            replicas.push(spawn_replica(
                api.clone(),
                slot,
                queue_rx.clone(),
                table.clone(),
                settings,
            )?);
        }

        let dispatcher = Dispatcher::new(
            table,
            queue_tx,
            ChannelPool::new(config.initial_pool_size, config.max_pool_size),
            config.timeout(),
        )
        .with_streaming(config.stream);
        let state = Arc::new(AppState {
            dispatcher,
            max_completions: config.max_completions,
        });
        let router = routes::router(state.clone(), authenticator);

        tracing::info!(
            replicas = replicas.len(),
            accelerator = %config.accelerator,
            max_batch_size = settings.max_batch_size,
            stream = settings.stream,
            "Server started"
        );

        Ok(RunningServer {
            config,
            router,
            state,
            replicas,
            queue_rx,
        })
    }

    /// Start, serve until Ctrl-C, then stop the replicas.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.start()?.serve(shutdown_signal()).await
    }
}

pub struct RunningServer {
    config: ServerConfig,
    router: Router,
    state: Arc<AppState>,
    replicas: Vec<ReplicaHandle>,
    /// Keeps the queue accepting work while no replica is alive, so callers
    /// time out instead of failing.
    queue_rx: QueueReceiver,
}

impl RunningServer {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn replicas(&self) -> &[ReplicaHandle] {
        &self.replicas
    }

    /// Bind, write the client stub, and serve until `shutdown` resolves.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.config.client_stub {
            generate_client_file(self.config.port);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Listening on {}", addr);

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Close the queue and wait for every replica to exit.
    ///
    /// Replicas only see the queue close once every router clone handed out
    /// by [`RunningServer::router`] has been dropped.
    pub async fn shutdown(self) {
        let RunningServer {
            router,
            state,
            replicas,
            queue_rx,
            ..
        } = self;
        drop(router);
        drop(state);
        drop(queue_rx);

        let joined = tokio::task::spawn_blocking(move || {
            for replica in replicas {
                let worker_id = replica.slot().worker_id;
                if replica.join().is_err() {
                    tracing::error!(worker_id, "Replica thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::error!("Failed to join replicas: {}", e);
        }
        tracing::info!("Server stopped");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
