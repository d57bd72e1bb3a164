use async_trait::async_trait;

use crate::error::StoreError;
use crate::lease::{LeasePatch, SlotLease};

/// What the allocator needs to know about the lease table, read in one consistent view.
///
/// Stores may stop early: once `first_free` is found the reclaim candidates are left unset,
/// and `stalest_active` is only looked up when the caller prefers active leases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationSnapshot {
    /// Smallest slot in `[0, total_slots)` without a lease record.
    pub first_free: Option<i64>,
    /// Stalest lease in the whole table whose state is not terminal.
    pub stalest_active: Option<SlotLease>,
    /// Stalest lease in the whole table, whatever its state.
    pub stalest_any: Option<SlotLease>,
}

/// A durable table of slot leases.
///
/// Implementations own all synchronization: `allocation_snapshot` must not observe a table
/// that changes halfway through, and `upsert_lease` must merge atomically so concurrent
/// updates of one slot are last-writer-wins per field.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Point read of a single lease.
    async fn get_lease(&self, slot_id: i64) -> Result<Option<SlotLease>, StoreError>;

    /// Insert the lease if absent, otherwise overwrite only the fields set in `patch`.
    async fn upsert_lease(&self, slot_id: i64, patch: &LeasePatch) -> Result<(), StoreError>;

    /// Every lease, ordered by slot id ascending.
    async fn list_leases(&self) -> Result<Vec<SlotLease>, StoreError>;

    async fn allocation_snapshot(
        &self,
        total_slots: i64,
        prefer_active: bool,
    ) -> Result<AllocationSnapshot, StoreError>;

    /// Cheap round trip used by the liveness loop.
    async fn ping(&self) -> Result<(), StoreError>;
}
