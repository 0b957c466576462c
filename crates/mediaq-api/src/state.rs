//! Application state.

use std::sync::Arc;

use mediaq_storage::ResultStore;
use mediaq_worker::Scheduler;

use crate::config::ServiceConfig;
use crate::error::hide_internal_details;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub scheduler: Scheduler,
}

impl AppState {
    /// Build the result store and scheduler for `config`.
    pub fn new(config: ServiceConfig) -> Self {
        hide_internal_details(config.is_production());

        let store = Arc::new(ResultStore::new(config.store_config()));
        let scheduler = Scheduler::new(config.worker_config(), store);

        Self {
            config: Arc::new(config),
            scheduler,
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        self.scheduler.store()
    }
}
