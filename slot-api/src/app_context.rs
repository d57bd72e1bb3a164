use std::sync::Arc;

use slot_common::config::StoreBackend;
use slot_common::health::HealthRegistry;
use slot_common::{InMemoryLeaseStore, LeaseStore, PgLeaseStore, SlotCoordinator, StoreError};
use tracing::{info, warn};

use crate::config::Config;

pub struct AppContext {
    pub coordinator: SlotCoordinator,
    pub health: HealthRegistry,
    pub default_total_slots: i64,
    pub max_body_size: usize,
    pub concurrency_limit: usize,
}

impl AppContext {
    /// Opens the configured store. Postgres is migrated here, before anything is served.
    pub async fn new(config: &Config) -> Result<Self, StoreError> {
        let store: Arc<dyn LeaseStore> = match config.store_backend {
            StoreBackend::Postgres => {
                let store = PgLeaseStore::new(&config.pool_config()).await?;
                store.migrate().await?;
                info!("connected to postgres lease store, migrations applied");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                warn!("using the in-memory lease store, leases will not survive a restart");
                Arc::new(InMemoryLeaseStore::new())
            }
        };

        Ok(Self::from_store(store, config))
    }

    pub fn from_store(store: Arc<dyn LeaseStore>, config: &Config) -> Self {
        let coordinator = SlotCoordinator::new(store).with_metrics_labels(vec![(
            "store".to_string(),
            config.store_backend.as_str().to_string(),
        )]);

        Self {
            coordinator,
            health: HealthRegistry::new("liveness"),
            default_total_slots: config.default_total_slots,
            max_body_size: config.max_body_size,
            concurrency_limit: config.concurrency_limit,
        }
    }
}
