use serde::{Deserialize, Serialize};

use crate::error::SlotError;
use crate::lease::LeasePatch;
use crate::store::LeaseStore;

/// Acknowledgement of a lease upsert, including the timestamp that was actually stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseUpserted {
    pub ok: bool,
    pub job_id: i64,
    pub updated_at: i64,
}

/// Creates or merges the lease for `slot_id`. `updated_at` defaults to `now` when the patch
/// leaves it out; every other unset field keeps whatever the store already holds.
///
/// `slot_id` is not checked against any slot count, the updater has no view of one.
pub async fn upsert_lease(
    store: &dyn LeaseStore,
    slot_id: i64,
    mut patch: LeasePatch,
    now: i64,
) -> Result<LeaseUpserted, SlotError> {
    let updated_at = *patch.updated_at.get_or_insert(now);

    store.upsert_lease(slot_id, &patch).await?;

    Ok(LeaseUpserted {
        ok: true,
        job_id: slot_id,
        updated_at,
    })
}
