use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::allocator::{allocate_slot, AllocationMode, AllocationRequest, SlotAssignment, NO_SLOT};
use crate::enumerator;
use crate::error::SlotError;
use crate::lease::{LeasePatch, SlotLease};
use crate::metrics::{histogram, inc, timing_guard};
use crate::metrics_consts::*;
use crate::store::LeaseStore;
use crate::updater::{self, LeaseUpserted};

/// Entry point for the service: runs the allocator, updater and enumerator against a shared
/// store, stamping the wall clock and reporting logs and metrics along the way.
#[derive(Clone)]
pub struct SlotCoordinator {
    store: Arc<dyn LeaseStore>,
    metrics_labels: Vec<(String, String)>,
}

impl SlotCoordinator {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            metrics_labels: Vec::new(),
        }
    }

    /// Labels attached to every metric this coordinator records.
    pub fn with_metrics_labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.metrics_labels = labels;
        self
    }

    pub fn store(&self) -> Arc<dyn LeaseStore> {
        self.store.clone()
    }

    pub async fn allocate(&self, request: AllocationRequest) -> Result<SlotAssignment, SlotError> {
        let now = Utc::now().timestamp();

        let timing = timing_guard(ALLOCATION_TIME, &self.metrics_labels);
        let assignment = allocate_slot(self.store.as_ref(), request, now)
            .await
            .inspect_err(|error| self.store_failed("allocate", error))?;
        timing.label("mode", assignment.mode.as_str()).fin();

        let labels = self.labels_with("mode", assignment.mode.as_str());
        inc(ALLOCATIONS, &labels, 1);

        match assignment.mode {
            AllocationMode::Free => debug!(
                job_id = assignment.job_id,
                total_slots = assignment.total_slots,
                "allocated free slot"
            ),
            AllocationMode::ReclaimStale if assignment.job_id == NO_SLOT => {
                inc(EMPTY_LEASE_TABLE, &self.metrics_labels, 1);
                warn!(
                    total_slots = assignment.total_slots,
                    "no free slot and no lease to reclaim"
                );
            }
            AllocationMode::ReclaimStale => {
                let stale_age = assignment.stale_age_sec.unwrap_or(0);
                histogram(RECLAIM_STALE_AGE, &self.metrics_labels, stale_age as f64);
                info!(
                    job_id = assignment.job_id,
                    state = assignment.previous_state().unwrap_or("null"),
                    stale_age_sec = stale_age,
                    checkpoint_pos = %assignment.checkpoint_pos,
                    "reclaiming stale slot"
                );
            }
        }

        Ok(assignment)
    }

    pub async fn upsert(&self, slot_id: i64, patch: LeasePatch) -> Result<LeaseUpserted, SlotError> {
        let now = Utc::now().timestamp();
        if patch.is_empty() {
            debug!(job_id = slot_id, "lease upsert carries no fields, only refreshing updated_at");
        }

        let upserted = {
            let _time = timing_guard(UPSERT_TIME, &self.metrics_labels);
            updater::upsert_lease(self.store.as_ref(), slot_id, patch, now)
                .await
                .inspect_err(|error| self.store_failed("upsert", error))?
        };
        inc(UPSERTS, &self.metrics_labels, 1);
        debug!(job_id = slot_id, updated_at = upserted.updated_at, "lease upserted");

        Ok(upserted)
    }

    pub async fn list(&self) -> Result<Vec<SlotLease>, SlotError> {
        let leases = {
            let _time = timing_guard(LIST_TIME, &self.metrics_labels);
            enumerator::list_leases(self.store.as_ref())
                .await
                .inspect_err(|error| self.store_failed("list", error))?
        };
        inc(LISTS, &self.metrics_labels, 1);
        histogram(LEASES_LISTED, &self.metrics_labels, leases.len() as f64);

        Ok(leases)
    }

    pub async fn get(&self, slot_id: i64) -> Result<Option<SlotLease>, SlotError> {
        enumerator::get_lease(self.store.as_ref(), slot_id)
            .await
            .inspect_err(|error| self.store_failed("get", error))
    }

    fn labels_with(&self, key: &str, value: &str) -> Vec<(String, String)> {
        let mut labels = self.metrics_labels.clone();
        labels.push((key.to_string(), value.to_string()));
        labels
    }

    fn store_failed(&self, operation: &str, error: &SlotError) {
        if let SlotError::StoreUnavailable(inner) = error {
            inc(STORE_ERRORS, &self.labels_with("operation", operation), 1);
            warn!(operation, "lease store call failed: {}", inner);
        }
    }
}
