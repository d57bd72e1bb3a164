use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use eyre::Result;
use tracing::{error, info};

use slot_common::allocator::AllocationRequest;
use slot_common::health::watch_store;
use slot_common::metrics::{serve, setup_metrics_routes};

use app_context::AppContext;
use config::Config;

mod app_context;
mod config;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env()?;
    // Refuse to start with a default nobody could allocate from.
    AllocationRequest::new(config.default_total_slots, true)?;

    info!(
        "starting slot-api with the {} lease store",
        config.store_backend.as_str()
    );
    let context = Arc::new(AppContext::new(&config).await?);

    let interval_secs = config.health_check_interval_secs.max(1);
    let store_liveness = context
        .health
        .register(
            "lease_store".to_string(),
            time::Duration::seconds(i64::from(interval_secs) * 4),
        )
        .await;
    tokio::spawn(watch_store(
        context.coordinator.store(),
        store_liveness,
        Duration::from_secs(u64::from(interval_secs)),
    ));

    let app = handlers::app(context);
    // Installs the process-global recorder, tests build the app without it.
    let app = if config.export_prometheus {
        setup_metrics_routes(app)?
    } else {
        app
    };

    let bind = config.bind();
    info!("listening on {}", bind);
    if let Err(e) = serve(app, &bind).await {
        error!("failed to start slot-api http server, {}", e);
        return Err(e.into());
    }

    Ok(())
}
