//! Application state.

use std::sync::Arc;

use vconv_events::EventBus;
use vconv_store::CatalogStore;

use crate::config::CoordinatorConfig;
use crate::services::{Dispatcher, TaskTracker, WorkerRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CoordinatorConfig>,
    pub catalog: CatalogStore,
    pub events: EventBus,
    pub registry: Arc<WorkerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub tracker: Arc<TaskTracker>,
}

impl AppState {
    /// Connect to the catalog, apply migrations and wire the components.
    pub async fn new(config: CoordinatorConfig) -> anyhow::Result<Self> {
        let catalog =
            CatalogStore::connect(&config.database.url, config.database.max_connections).await?;
        catalog.run_migrations().await?;

        let events = EventBus::default();
        let registry = Arc::new(WorkerRegistry::new(
            catalog.clone(),
            events.clone(),
            config.heartbeat_timeout(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(catalog.clone(), events.clone()));
        let tracker = Arc::new(TaskTracker::new(catalog.clone(), events.clone()));

        Ok(Self {
            config: Arc::new(config),
            catalog,
            events,
            registry,
            dispatcher,
            tracker,
        })
    }
}
