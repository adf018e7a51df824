//! Startup orchestration.
//!
//! # Responsibilities
//! - Construct every subsystem explicitly, in dependency order
//! - Start background tasks (sync loop, counter eviction, admin listener)
//! - Bind the gateway listener last
//! - On shutdown: stop accepting, drain in-flight requests, tear down registries
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - One `Registries` instance, passed down; nothing global
//! - Traffic may arrive before the first sync completes; it gets 404s

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::backend::{BackendConnector, HttpConnector};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::flow::RhaiExpressionEngine;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::{self, Shutdown};
use crate::lifecycle::signals;
use crate::observability::TracingSink;
use crate::policy::PolicyRegistry;
use crate::reactor::Dispatcher;
use crate::registry::Registries;
use crate::resilience::CircuitBreakers;
use crate::security::{CounterStore, InMemoryCounterStore};
use crate::sync::{ControlPlaneSource, HttpControlPlaneSource, SyncEngine};

/// A fully wired gateway node.
pub struct GatewayRuntime {
    config: GatewayConfig,
    registries: Arc<Registries>,
    dispatcher: Arc<Dispatcher>,
    sync: Option<Arc<SyncEngine>>,
    counters: Arc<InMemoryCounterStore>,
    shutdown: Arc<Shutdown>,
}

impl GatewayRuntime {
    /// Wire the node from configuration, with the HTTP backend and control plane.
    pub fn build(config: GatewayConfig) -> Result<Self, GatewayError> {
        let connector = Arc::new(HttpConnector::new(config.backend.clone()));
        let source: Option<Arc<dyn ControlPlaneSource>> = if config.sync.enabled {
            Some(Arc::new(HttpControlPlaneSource::new(&config.sync)?))
        } else {
            tracing::info!("Synchronization disabled");
            None
        };
        Ok(Self::with_parts(config, connector, source))
    }

    /// Wire the node around caller-provided collaborators.
    pub fn with_parts(
        config: GatewayConfig,
        connector: Arc<dyn BackendConnector>,
        source: Option<Arc<dyn ControlPlaneSource>>,
    ) -> Self {
        let registries = Arc::new(Registries::new());
        let counters = Arc::new(InMemoryCounterStore::new());
        let factory = PolicyRegistry::with_builtins(
            Arc::clone(&counters) as Arc<dyn CounterStore>,
            Arc::new(CircuitBreakers::new()),
            config.rate_limit.store_attempts,
        );
        let expressions = Arc::new(RhaiExpressionEngine::new().with_dictionaries(Arc::clone(&registries)));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registries),
            Arc::new(factory),
            expressions,
            connector,
            Arc::new(TracingSink),
            config.timeouts.clone(),
        ));

        let sync = source.map(|source| Arc::new(SyncEngine::new(source, Arc::clone(&registries), &config.sync)));

        Self {
            config,
            registries,
            dispatcher,
            sync,
            counters,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn sync_engine(&self) -> Option<&Arc<SyncEngine>> {
        self.sync.as_ref()
    }

    pub fn shutdown(&self) -> &Arc<Shutdown> {
        &self.shutdown
    }

    /// Serve on `listener` until SIGINT/SIGTERM or `shutdown().trigger()`.
    pub async fn run(self, listener: TcpListener) -> Result<(), GatewayError> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if let Some(engine) = &self.sync {
            tasks.push(tokio::spawn(Arc::clone(engine).run(self.shutdown.subscribe())));
        }

        let eviction = Duration::from_secs(self.config.rate_limit.eviction_interval_secs.max(1));
        tasks.push(tokio::spawn(
            Arc::clone(&self.counters).run_eviction(eviction, self.shutdown.subscribe()),
        ));

        if self.config.admin.enabled {
            tasks.push(self.start_admin().await?);
        }

        {
            let shutdown = Arc::clone(&self.shutdown);
            tokio::spawn(async move { signals::shutdown_on_signal(&shutdown).await });
        }

        let server = HttpServer::new(Arc::clone(&self.dispatcher), &self.config.listener);
        let served = server.run(listener, self.shutdown.subscribe()).await;

        self.shutdown.trigger();
        let drain = Duration::from_millis(self.config.shutdown.drain_timeout_ms + self.config.timeouts.grace_ms);
        if !self.registries.drain(drain).await {
            tracing::warn!(drain_ms = drain.as_millis() as u64, "Shutdown forced with requests in flight");
        }

        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!("Background task did not stop in time");
            }
        }

        tracing::info!("Gateway stopped");
        served.map_err(GatewayError::from)
    }

    async fn start_admin(&self) -> Result<JoinHandle<()>, GatewayError> {
        let listener = TcpListener::bind(&self.config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin listener starting");

        let router = setup_admin_router(AdminState {
            registries: Arc::clone(&self.registries),
            sync: self.sync.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
        });
        let rx = self.shutdown.subscribe();
        Ok(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown::wait(rx))
                .await
            {
                tracing::error!(error = %error, "Admin listener failed");
            }
        }))
    }
}
