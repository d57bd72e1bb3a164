//! Liveness reporting.
//!
//! Each background loop registers a component and must keep reporting within its deadline.
//! The service is live only when every registered component is; a registry with no
//! components is not live, since nothing has proven the process works yet.
use std::collections::BTreeMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::LeaseStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Set on registration, before the first report
    Starting,
    /// Reported healthy, must report again before this instant
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// The component missed its deadline
    Stalled,
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (code, format!("{:?}", self)).into_response()
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Must be called more often than the deadline the component registered with.
    pub async fn report_healthy(&self) {
        let until = OffsetDateTime::now_utc().add(self.deadline);
        self.report_status(ComponentStatus::HealthyUntil(until))
            .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report {} health: {}", self.component, err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<BTreeMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime, it spawns the task collecting reports.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<HealthMessage>(16);
        let components: Arc<RwLock<BTreeMap<String, ComponentStatus>>> = Default::default();

        let writer = components.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match writer.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("health registry lock is poisoned"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    /// Registers `component`, which starts out as `Starting`.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Overall status of the process. Usable directly as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health registry lock is poisoned", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: BTreeMap::new(),
        };

        for (name, component) in components.iter() {
            let component = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(component, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component);
        }

        if status.healthy {
            debug!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}

/// Pings the lease store every `interval`, reporting the outcome through `handle`.
/// Runs until the process exits.
pub async fn watch_store(
    store: Arc<dyn LeaseStore>,
    handle: HealthHandle,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.ping().await {
            Ok(()) => handle.report_healthy().await,
            Err(error) => {
                warn!("lease store ping failed: {}", error);
                handle.report_status(ComponentStatus::Unhealthy).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLeaseStore;
    use std::ops::Sub;

    async fn eventually<F>(check: F)
    where
        F: Fn() -> bool,
    {
        let deadline = OffsetDateTime::now_utc().add(Duration::seconds(5));
        while !check() && OffsetDateTime::now_utc() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(check())
    }

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn component_lifecycle() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("store".to_string(), Duration::seconds(30))
            .await;

        eventually(|| registry.get_status().components.len() == 1).await;
        assert_eq!(
            registry.get_status().components.get("store"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        eventually(|| !registry.get_status().healthy).await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                OffsetDateTime::now_utc().sub(Duration::seconds(1)),
            ))
            .await;
        eventually(|| {
            registry.get_status().components.get("store") == Some(&ComponentStatus::Stalled)
        })
        .await;
    }

    #[tokio::test]
    async fn every_component_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let store = registry
            .register("store".to_string(), Duration::seconds(30))
            .await;
        let other = registry
            .register("other".to_string(), Duration::seconds(30))
            .await;
        eventually(|| registry.get_status().components.len() == 2).await;

        store.report_healthy().await;
        eventually(|| {
            registry.get_status().components.get("store") != Some(&ComponentStatus::Starting)
        })
        .await;
        assert!(!registry.get_status().healthy);

        other.report_healthy().await;
        eventually(|| registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn store_watcher_reports_healthy() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("lease_store".to_string(), Duration::seconds(30))
            .await;
        let store: Arc<dyn LeaseStore> = Arc::new(InMemoryLeaseStore::new());

        tokio::spawn(watch_store(
            store,
            handle,
            std::time::Duration::from_millis(10),
        ));

        eventually(|| registry.get_status().healthy).await;
    }
}
