//! # Pipeline Bootstrap
//!
//! Wires stores, resilience components and the state tracker from a loaded
//! [`ConfigManager`], and owns the lifecycle of the two background loops (resilience
//! monitor and state reconciler).
//!
//! ```rust,no_run
//! use pipeline_core::bootstrap::PipelineCore;
//! use pipeline_core::config::ConfigManager;
//!
//! # async fn example() -> pipeline_core::Result<()> {
//! let core = PipelineCore::bootstrap(ConfigManager::load()?).await?;
//! let mut handle = core.start_background_tasks();
//! // ... run pipeline stages through core.resilience() and core.tracker() ...
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigManager, ConfigurationError, EntityBackend, PipelineConfig, StoreBackend};
use crate::error::Result;
use crate::resilience::{ResilienceManager, ResilienceMonitor};
use crate::state_machine::{Reconciler, StateTracker};
use crate::store::{EntityRepository, InMemoryEntityRepository, InMemoryStore, StoreHandles};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fully wired pipeline core
#[derive(Debug, Clone)]
pub struct PipelineCore {
    config: Arc<PipelineConfig>,
    stores: StoreHandles,
    clock: SharedClock,
    resilience: Arc<ResilienceManager>,
    monitor: Arc<ResilienceMonitor>,
    tracker: Arc<StateTracker>,
    reconciler: Arc<Reconciler>,
}

impl PipelineCore {
    /// Connect the configured backends and build the component graph
    pub async fn bootstrap(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.config().clone();
        info!(
            environment = config_manager.environment(),
            store_backend = ?config.store.backend,
            entity_backend = ?config.store.entity_backend,
            "Bootstrapping pipeline core"
        );

        let clock = SystemClock::shared();
        let stores = connect_stores(&config, Arc::clone(&clock)).await?;
        Ok(Self::new(config, stores, clock))
    }

    /// Build the component graph over already-constructed stores
    pub fn new(config: PipelineConfig, stores: StoreHandles, clock: SharedClock) -> Self {
        let resilience = Arc::new(ResilienceManager::new(&config, &stores, Arc::clone(&clock)));
        let monitor = Arc::new(ResilienceMonitor::new(
            Arc::clone(&resilience),
            config.monitor.clone(),
        ));
        let tracker = Arc::new(StateTracker::from_stores(
            &stores,
            Arc::clone(&clock),
            config.state_tracker.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&tracker)));

        Self {
            config: Arc::new(config),
            stores,
            clock,
            resilience,
            monitor,
            tracker,
            reconciler,
        }
    }

    /// In-memory wiring with the default configuration
    pub fn in_memory(clock: SharedClock) -> Self {
        Self::new(
            PipelineConfig::default(),
            StoreHandles::in_memory(Arc::clone(&clock)),
            clock,
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stores(&self) -> &StoreHandles {
        &self.stores
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn resilience(&self) -> &Arc<ResilienceManager> {
        &self.resilience
    }

    pub fn monitor(&self) -> &Arc<ResilienceMonitor> {
        &self.monitor
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Spawn the monitor and reconciler loops
    pub fn start_background_tasks(&self) -> PipelineSystemHandle {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let tasks = vec![
            Arc::clone(&self.monitor).spawn(shutdown_receiver.clone()),
            Arc::clone(&self.reconciler).spawn(shutdown_receiver),
        ];

        info!("Pipeline background tasks started");
        PipelineSystemHandle {
            shutdown_sender: Some(shutdown_sender),
            tasks,
            monitor: Arc::clone(&self.monitor),
        }
    }
}

/// Lifecycle handle for the background loops started by [`PipelineCore::start_background_tasks`]
#[derive(Debug)]
pub struct PipelineSystemHandle {
    shutdown_sender: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    monitor: Arc<ResilienceMonitor>,
}

impl PipelineSystemHandle {
    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    /// Signal shutdown, wait for the loops, then run one final monitor cycle
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(sender) = self.shutdown_sender.take() else {
            return Ok(());
        };

        if sender.send(true).is_err() {
            warn!("Background tasks exited before shutdown was signalled");
        }

        let mut first_failure = None;
        for task in self.tasks.drain(..) {
            if let Err(error) = task.await {
                warn!(error = %error, "Background task ended abnormally");
                first_failure.get_or_insert(error);
            }
        }

        // Final metrics flush so the last window is persisted
        self.monitor.run_cycle().await;
        info!("Pipeline background tasks stopped");

        match first_failure {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

async fn connect_stores(config: &PipelineConfig, clock: SharedClock) -> Result<StoreHandles> {
    let entities = connect_entity_repository(config).await?;

    match config.store.backend {
        StoreBackend::Memory => Ok(StoreHandles::shared(
            Arc::new(InMemoryStore::new(clock)),
            entities,
        )),
        StoreBackend::Redis => connect_redis(config, entities).await,
    }
}

#[cfg(feature = "redis-store")]
async fn connect_redis(
    config: &PipelineConfig,
    entities: Arc<dyn EntityRepository>,
) -> Result<StoreHandles> {
    let url = config.store.redis_url.as_deref().ok_or_else(|| {
        ConfigurationError::invalid_value("store.redis_url", "", "required for the redis backend")
    })?;
    let store = crate::store::RedisStore::connect(url).await?;
    Ok(StoreHandles::shared(Arc::new(store), entities))
}

#[cfg(not(feature = "redis-store"))]
async fn connect_redis(
    _config: &PipelineConfig,
    _entities: Arc<dyn EntityRepository>,
) -> Result<StoreHandles> {
    Err(ConfigurationError::invalid_value(
        "store.backend",
        "redis",
        "built without the redis-store feature",
    )
    .into())
}

async fn connect_entity_repository(config: &PipelineConfig) -> Result<Arc<dyn EntityRepository>> {
    match config.store.entity_backend {
        EntityBackend::Memory => Ok(Arc::new(InMemoryEntityRepository::new())),
        EntityBackend::Postgres => connect_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &PipelineConfig) -> Result<Arc<dyn EntityRepository>> {
    let url = config.store.database_url.as_deref().ok_or_else(|| {
        ConfigurationError::invalid_value(
            "store.database_url",
            "",
            "required for the postgres entity backend",
        )
    })?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.store.max_connections)
        .connect(url)
        .await?;
    let repository = crate::store::PgEntityRepository::new(pool);
    repository.migrate().await?;
    Ok(Arc::new(repository))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &PipelineConfig) -> Result<Arc<dyn EntityRepository>> {
    Err(ConfigurationError::invalid_value(
        "store.entity_backend",
        "postgres",
        "built without the postgres feature",
    )
    .into())
}
