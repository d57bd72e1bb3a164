pub const ALLOCATIONS: &str = "slot_allocations_total";
pub const ALLOCATION_TIME: &str = "slot_allocation_ms";
// Age of the lease handed over on reclaim, in seconds
pub const RECLAIM_STALE_AGE: &str = "slot_reclaim_stale_age_seconds";
pub const EMPTY_LEASE_TABLE: &str = "slot_allocation_empty_table_total";

pub const UPSERTS: &str = "slot_lease_upserts_total";
pub const UPSERT_TIME: &str = "slot_lease_upsert_ms";

pub const LISTS: &str = "slot_lease_lists_total";
pub const LIST_TIME: &str = "slot_lease_list_ms";
pub const LEASES_LISTED: &str = "slot_leases_listed";

pub const STORE_ERRORS: &str = "slot_store_errors_total";
