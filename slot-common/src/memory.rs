//! In-process implementation of `LeaseStore`.
//!
//! Leases live in a `BTreeMap` behind a `RwLock` and are lost on restart. Useful for local
//! runs and tests; production deployments should use `PgLeaseStore`.
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::lease::{LeasePatch, SlotLease};
use crate::store::{AllocationSnapshot, LeaseStore};

#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<BTreeMap<i64, SlotLease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing leases, e.g. to reproduce a production table in a test.
    pub fn with_leases<I>(leases: I) -> Self
    where
        I: IntoIterator<Item = SlotLease>,
    {
        let leases = leases
            .into_iter()
            .map(|lease| (lease.slot_id, lease))
            .collect();

        Self {
            leases: RwLock::new(leases),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get_lease(&self, slot_id: i64) -> Result<Option<SlotLease>, StoreError> {
        Ok(self.leases.read().await.get(&slot_id).cloned())
    }

    async fn upsert_lease(&self, slot_id: i64, patch: &LeasePatch) -> Result<(), StoreError> {
        // The write lock makes the read-merge-write a single step, like ON CONFLICT DO UPDATE.
        self.leases
            .write()
            .await
            .entry(slot_id)
            .or_insert_with(|| SlotLease::empty(slot_id))
            .merge(patch);

        Ok(())
    }

    async fn list_leases(&self) -> Result<Vec<SlotLease>, StoreError> {
        Ok(self.leases.read().await.values().cloned().collect())
    }

    async fn allocation_snapshot(
        &self,
        total_slots: i64,
        prefer_active: bool,
    ) -> Result<AllocationSnapshot, StoreError> {
        let leases = self.leases.read().await;

        Ok(AllocationSnapshot::from_sorted_leases(
            leases.values(),
            total_slots,
            prefer_active,
        ))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::allocator::{allocate_slot, AllocationRequest};

    fn stamped(slot_id: i64, updated_at: i64, state: &str) -> SlotLease {
        SlotLease {
            updated_at: Some(updated_at),
            state: Some(state.to_owned()),
            ..SlotLease::empty(slot_id)
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_merges() {
        let store = InMemoryLeaseStore::new();
        assert_eq!(store.get_lease(3).await.unwrap(), None);

        let patch = LeasePatch {
            state: Some("running".to_owned()),
            start_pos: Some("3000".to_owned()),
            updated_at: Some(10),
            ..Default::default()
        };
        store.upsert_lease(3, &patch).await.unwrap();

        let heartbeat = LeasePatch {
            checkpoint_pos: Some("3500".to_owned()),
            updated_at: Some(20),
            ..Default::default()
        };
        store.upsert_lease(3, &heartbeat).await.unwrap();

        let lease = store.get_lease(3).await.unwrap().unwrap();
        assert_eq!(lease.state.as_deref(), Some("running"));
        assert_eq!(lease.start_pos.as_deref(), Some("3000"));
        assert_eq!(lease.checkpoint_pos.as_deref(), Some("3500"));
        assert_eq!(lease.updated_at, Some(20));
        assert_eq!(lease.end_pos, None);
    }

    #[tokio::test]
    async fn list_is_ordered_numerically() {
        let store = InMemoryLeaseStore::new();
        for slot_id in [10, 2, 1, -4] {
            store
                .upsert_lease(slot_id, &LeasePatch::running("0"))
                .await
                .unwrap();
        }

        let ids: Vec<i64> = store
            .list_leases()
            .await
            .unwrap()
            .into_iter()
            .map(|lease| lease.slot_id)
            .collect();
        assert_eq!(ids, vec![-4, 1, 2, 10]);
    }

    #[tokio::test]
    async fn snapshot_stops_at_first_free_slot() {
        let store = InMemoryLeaseStore::with_leases(vec![stamped(0, 5, "running")]);

        let snapshot = store.allocation_snapshot(3, true).await.unwrap();
        assert_eq!(
            snapshot,
            AllocationSnapshot {
                first_free: Some(1),
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn snapshot_reports_both_reclaim_candidates() {
        let store = InMemoryLeaseStore::with_leases(vec![
            stamped(0, 50, "running"),
            stamped(1, 10, "done"),
            stamped(2, 40, "running"),
        ]);

        let snapshot = store.allocation_snapshot(3, true).await.unwrap();
        assert_eq!(snapshot.first_free, None);
        assert_eq!(snapshot.stalest_active.map(|l| l.slot_id), Some(2));
        assert_eq!(snapshot.stalest_any.map(|l| l.slot_id), Some(1));

        let snapshot = store.allocation_snapshot(3, false).await.unwrap();
        assert_eq!(snapshot.stalest_active, None);
        assert_eq!(snapshot.stalest_any.map(|l| l.slot_id), Some(1));
    }

    #[tokio::test]
    async fn reclaims_the_stalest_lease_beyond_the_requested_range() {
        let store = InMemoryLeaseStore::with_leases(vec![
            stamped(0, 100, "running"),
            stamped(1, 90, "running"),
            stamped(5, 1, "running"),
        ]);

        let request = AllocationRequest::new(2, true).unwrap();
        let assignment = allocate_slot(&store, request, 1_000).await.unwrap();

        assert_eq!(assignment.job_id, 5);
        assert_eq!(assignment.updated_at, Some(1));
        assert_eq!(assignment.stale_age_sec, Some(999));
    }

    #[tokio::test]
    async fn concurrent_upserts_of_one_slot_keep_every_field() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let patches = vec![
            LeasePatch {
                state: Some("running".to_owned()),
                ..Default::default()
            },
            LeasePatch {
                checkpoint_pos: Some("4096".to_owned()),
                ..Default::default()
            },
            LeasePatch {
                start_pos: Some("3000".to_owned()),
                end_pos: Some("4000".to_owned()),
                ..Default::default()
            },
            LeasePatch {
                chunk_size: Some(1000),
                ..Default::default()
            },
            LeasePatch {
                updated_at: Some(42),
                ..Default::default()
            },
        ];

        let handles: Vec<_> = patches
            .into_iter()
            .map(|patch| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_lease(3, &patch).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            store.get_lease(3).await.unwrap(),
            Some(SlotLease {
                slot_id: 3,
                state: Some("running".to_owned()),
                checkpoint_pos: Some("4096".to_owned()),
                updated_at: Some(42),
                start_pos: Some("3000".to_owned()),
                end_pos: Some("4000".to_owned()),
                chunk_size: Some(1000),
            })
        );
        assert_eq!(store.list_leases().await.unwrap().len(), 1);
    }
}
