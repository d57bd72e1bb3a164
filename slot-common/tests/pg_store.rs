use slot_common::allocator::{allocate_slot, AllocationMode, AllocationRequest};
use slot_common::{LeasePatch, LeaseStore, PgLeaseStore, SlotLease};
use sqlx::PgPool;

fn stamp(state: &str, updated_at: Option<i64>) -> LeasePatch {
    LeasePatch {
        state: Some(state.to_owned()),
        checkpoint_pos: Some("0".to_owned()),
        updated_at,
        ..Default::default()
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn upsert_merges_without_clearing_fields(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);

    let claim = LeasePatch {
        state: Some("running".to_owned()),
        checkpoint_pos: Some("123456789012345678901234567890".to_owned()),
        start_pos: Some("1000000000000".to_owned()),
        end_pos: Some("2000000000000".to_owned()),
        chunk_size: Some(1_000_000_000_000),
        updated_at: Some(100),
    };
    store.upsert_lease(1, &claim).await.unwrap();
    store
        .upsert_lease(
            1,
            &LeasePatch {
                state: Some("done".to_owned()),
                updated_at: Some(200),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        store.get_lease(1).await.unwrap(),
        Some(SlotLease {
            slot_id: 1,
            state: Some("done".to_owned()),
            checkpoint_pos: Some("123456789012345678901234567890".to_owned()),
            updated_at: Some(200),
            start_pos: Some("1000000000000".to_owned()),
            end_pos: Some("2000000000000".to_owned()),
            chunk_size: Some(1_000_000_000_000),
        })
    );
    assert_eq!(store.get_lease(2).await.unwrap(), None);
}

#[sqlx::test(migrations = "./migrations")]
async fn list_is_ordered_by_slot_id(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);
    for slot_id in [10, 2, 1] {
        store
            .upsert_lease(slot_id, &stamp("running", Some(1)))
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
    assert_eq!(ids, vec![1, 2, 10]);
}

#[sqlx::test(migrations = "./migrations")]
async fn finds_the_first_gap(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);

    let snapshot = store.allocation_snapshot(3, true).await.unwrap();
    assert_eq!(snapshot.first_free, Some(0));

    for slot_id in [0, 1, 3] {
        store
            .upsert_lease(slot_id, &stamp("running", Some(1)))
            .await
            .unwrap();
    }
    let snapshot = store.allocation_snapshot(5, true).await.unwrap();
    assert_eq!(snapshot.first_free, Some(2));

    let snapshot = store.allocation_snapshot(2, true).await.unwrap();
    assert_eq!(snapshot.first_free, None);
}

#[sqlx::test(migrations = "./migrations")]
async fn allocates_like_the_in_memory_store(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);
    store
        .upsert_lease(0, &stamp("running", Some(100)))
        .await
        .unwrap();
    store.upsert_lease(1, &stamp("Done", Some(50))).await.unwrap();

    let request = AllocationRequest::new(3, true).unwrap();
    let assignment = allocate_slot(&store, request, 1_000).await.unwrap();
    assert_eq!(assignment.mode, AllocationMode::Free);
    assert_eq!(assignment.job_id, 2);

    store
        .upsert_lease(2, &stamp("running", Some(200)))
        .await
        .unwrap();
    let assignment = allocate_slot(&store, request, 1_000).await.unwrap();
    assert_eq!(assignment.mode, AllocationMode::ReclaimStale);
    assert_eq!(assignment.job_id, 0);
    assert_eq!(assignment.stale_age_sec, Some(900));

    let request = AllocationRequest::new(3, false).unwrap();
    let assignment = allocate_slot(&store, request, 1_000).await.unwrap();
    assert_eq!(assignment.job_id, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn null_updated_at_is_stalest_across_the_whole_table(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);
    store.upsert_lease(0, &stamp("running", Some(5))).await.unwrap();
    store.upsert_lease(1, &stamp("running", Some(3))).await.unwrap();
    store.upsert_lease(7, &stamp("running", None)).await.unwrap();
    store.upsert_lease(9, &stamp("done", None)).await.unwrap();

    let snapshot = store.allocation_snapshot(2, true).await.unwrap();
    assert_eq!(snapshot.first_free, None);
    assert_eq!(snapshot.stalest_active.map(|l| l.slot_id), Some(7));
    assert_eq!(snapshot.stalest_any.map(|l| l.slot_id), Some(7));

    let snapshot = store.allocation_snapshot(2, false).await.unwrap();
    assert_eq!(snapshot.stalest_active, None);
    assert_eq!(snapshot.stalest_any.map(|l| l.slot_id), Some(7));
}

#[sqlx::test(migrations = "./migrations")]
async fn reclaims_the_stalest_lease_beyond_the_requested_range(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);
    store
        .upsert_lease(0, &stamp("running", Some(100)))
        .await
        .unwrap();
    store.upsert_lease(1, &stamp("running", Some(90))).await.unwrap();
    store.upsert_lease(5, &stamp("running", Some(1))).await.unwrap();

    let request = AllocationRequest::new(2, true).unwrap();
    let assignment = allocate_slot(&store, request, 1_000).await.unwrap();

    assert_eq!(assignment.mode, AllocationMode::ReclaimStale);
    assert_eq!(assignment.job_id, 5);
    assert_eq!(assignment.stale_age_sec, Some(999));
}

#[sqlx::test(migrations = "./migrations")]
async fn ping_succeeds(db: PgPool) {
    let store = PgLeaseStore::from_pool(db);
    store.ping().await.unwrap();
}
