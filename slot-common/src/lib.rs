// Operations live in their own modules; the public surface is re-exported below so the
// internals can move around without breaking the api or worker crates.

// Data model
pub mod lease;
pub use lease::LeasePatch;
pub use lease::SlotLease;

// Errors about requests, the lease store and the worker client
pub mod error;
pub use error::ClientError;
pub use error::SlotError;
pub use error::StoreError;

// Storage
pub mod memory;
pub mod pgstore;
pub mod store;
pub use memory::InMemoryLeaseStore;
pub use pgstore::PgLeaseStore;
pub use store::AllocationSnapshot;
pub use store::LeaseStore;

// Operations
pub mod allocator;
pub mod coordinator;
pub mod enumerator;
pub mod updater;
pub use allocator::AllocationMode;
pub use allocator::AllocationRequest;
pub use allocator::SlotAssignment;
pub use coordinator::SlotCoordinator;
pub use updater::LeaseUpserted;

// Worker side
pub mod client;
pub use client::ClaimedSlot;
pub use client::SlotClient;

// Ambient
pub mod config;
pub mod health;
pub mod metrics;
pub mod metrics_consts;
pub mod retry;
pub mod wire;
