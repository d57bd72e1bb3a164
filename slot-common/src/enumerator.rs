use crate::error::SlotError;
use crate::lease::SlotLease;
use crate::store::LeaseStore;

/// Every lease, ordered by numeric slot id.
pub async fn list_leases(store: &dyn LeaseStore) -> Result<Vec<SlotLease>, SlotError> {
    Ok(store.list_leases().await?)
}

pub async fn get_lease(
    store: &dyn LeaseStore,
    slot_id: i64,
) -> Result<Option<SlotLease>, SlotError> {
    Ok(store.get_lease(slot_id).await?)
}
