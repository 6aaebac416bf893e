use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use vanishling_crypto::KeyedHasher;
use vanishling_journal::Journal;
use vanishling_reaper::Reaper;
use vanishling_store::{CapacityGuard, ContentStore, SpaceProbe, StatvfsProbe};
use vanishling_types::{Clock, SystemClock};

use crate::config::VanishlingConfig;
use crate::error::ServerResult;
use crate::handler::AppState;
use crate::router::build_router;

/// The vanishling service: HTTP boundary plus the reaper task.
pub struct VanishlingServer {
    config: VanishlingConfig,
    state: Arc<AppState>,
    reaper: Arc<Reaper>,
}

impl VanishlingServer {
    /// Open the storage and journal roots and wire up the components.
    ///
    /// Failing to create either root is fatal.
    pub fn new(config: VanishlingConfig) -> ServerResult<Self> {
        Self::with_parts(config, Arc::new(SystemClock), StatvfsProbe)
    }

    /// Like [`new`](Self::new) with an explicit clock and disk-space probe.
    pub fn with_parts(
        config: VanishlingConfig,
        clock: Arc<dyn Clock>,
        probe: impl SpaceProbe + 'static,
    ) -> ServerResult<Self> {
        config.validate()?;

        let store = ContentStore::open(&config.storage_root, KeyedHasher::new(config.hash_key()?))?
            .with_clock(Arc::clone(&clock));
        let journal = Arc::new(Journal::open(&config.journal_root)?.with_clock(Arc::clone(&clock)));
        let guard = CapacityGuard::with_probe(store.root(), config.capacity_threshold_percent, probe);
        let reaper = Arc::new(
            Reaper::new(Arc::clone(&journal), config.reaper_config(store.root())).with_clock(clock),
        );

        let state = Arc::new(AppState {
            store,
            journal,
            guard,
            ttl_policy: config.ttl_policy(),
        });
        Ok(Self {
            config,
            state,
            reaper,
        })
    }

    pub fn config(&self) -> &VanishlingConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(Arc::clone(&self.state), self.config.max_upload_bytes)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener. The reaper runs for exactly as
    /// long as the HTTP server does.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reaper = Arc::clone(&self.reaper).spawn();
        let app = self.router();

        info!(
            addr = %listener.local_addr()?,
            storage_root = %self.state.store.root().display(),
            journal = %self.state.journal.path().display(),
            "vanishling listening"
        );
        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await;

        reaper.shutdown().await;
        info!("vanishling stopped");
        Ok(served?)
    }
}

impl std::fmt::Debug for VanishlingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VanishlingServer")
            .field("listen_addr", &self.config.listen_addr)
            .field("state", &self.state)
            .finish()
    }
}
