use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::background::{AutoAssignLoop, ReconcileLoop};
use crate::config::ServerConfig;
use crate::dashboard::{self, DashboardState};
use crate::error::Result;
use crate::service::QueueService;
use crate::store::{MemoryStore, Store};

/// Wires the store, service, background loops and HTTP API together.
pub struct Server {
    config: ServerConfig,
}

/// A server whose listener is bound and whose tasks are running.
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub service: Arc<QueueService>,
    http: JoinHandle<std::io::Result<()>>,
    loops: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl RunningServer {
    /// Wait for the HTTP server and the background loops to drain.
    ///
    /// If the HTTP server stops on its own the loops are cancelled too.
    pub async fn wait(self) -> Result<()> {
        let served = match self.http.await {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(crate::error::QueueError::Store(format!(
                "HTTP server task failed: {}",
                e
            ))),
        };
        if let Err(e) = &served {
            if !self.shutdown.is_cancelled() {
                tracing::error!(error = %e, "HTTP server stopped unexpectedly, stopping background loops");
            }
        }
        self.shutdown.cancel();
        for handle in self.loops {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background loop ended abnormally");
            }
        }
        served
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    async fn open_store(&self) -> Result<Arc<dyn Store>> {
        let store = match &self.config.data_path {
            Some(path) => MemoryStore::open(path).await?,
            None => {
                tracing::info!("Running with an in-memory store, data is lost on exit");
                MemoryStore::new()
            }
        };
        Ok(Arc::new(store))
    }

    /// Bind the listener and spawn every subsystem:
    /// 1. Opens the store (loading the snapshot when configured)
    /// 2. Applies the startup auto-assign override
    /// 3. Binds the HTTP listener
    /// 4. Spawns the auto-assign loop, and the reconcile loop unless its
    ///    interval is zero
    /// 5. Spawns the HTTP API
    ///
    /// All tasks stop when `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningServer> {
        let store = self.open_store().await?;
        let service = Arc::new(QueueService::with_conflict_retries(
            store,
            self.config.conflict_retries,
        ));

        if let Some(enabled) = self.config.auto_assign_on_start {
            service.set_auto_assign(enabled).await?;
        }

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let mut loops = Vec::new();

        let auto_assign = AutoAssignLoop::new(
            service.clone(),
            self.config.poll.clone(),
            shutdown.clone(),
        );
        loops.push(tokio::spawn(auto_assign.run()));

        if let Some(interval) = self.config.poll.reconcile_interval() {
            let reconcile = ReconcileLoop::new(service.clone(), interval, shutdown.clone())
                .with_retention_days(self.config.poll.retention_days);
            loops.push(tokio::spawn(reconcile.run()));
        }

        tracing::info!(addr = %local_addr, "Starting HTTP API");

        let state = DashboardState::new(service.clone());
        let http = tokio::spawn(dashboard::serve(listener, state, shutdown.clone()));

        Ok(RunningServer {
            local_addr,
            service,
            http,
            loops,
            shutdown,
        })
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let running = self.start(shutdown).await?;
        running.wait().await?;
        tracing::info!("Server stopped");
        Ok(())
    }
}
