//! # Slot allocation
//!
//! Picks a slot for a newly connecting worker: the smallest free slot if there is one,
//! otherwise the stalest lease, preferring slots whose work is not finished yet.
//!
//! Allocation is read-only and takes no lock. Two workers asking at the same moment can be
//! handed the same stale slot; they will then overwrite each other's checkpoints on the same
//! range until one of them stops heartbeating. Leases are advisory, and there is no fencing
//! token that would let the losing worker notice.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::SlotError;
use crate::lease::SlotLease;
use crate::store::{AllocationSnapshot, LeaseStore};

pub const DEFAULT_TOTAL_SLOTS: i64 = 2252;

/// Resume position handed out with a fresh slot, and in place of a missing checkpoint.
pub const ORIGIN_CHECKPOINT: &str = "0";

/// `job_id` reported when there is nothing to hand out.
pub const NO_SLOT: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    Free,
    ReclaimStale,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Free => "free",
            AllocationMode::ReclaimStale => "reclaim_stale",
        }
    }
}

/// A validated allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    total_slots: i64,
    prefer_active: bool,
}

impl AllocationRequest {
    pub fn new(total_slots: i64, prefer_active: bool) -> Result<Self, SlotError> {
        if total_slots < 1 {
            return Err(SlotError::validation(format!(
                "total_slots must be at least 1, got {total_slots}"
            )));
        }

        Ok(Self {
            total_slots,
            prefer_active,
        })
    }

    pub fn total_slots(&self) -> i64 {
        self.total_slots
    }

    pub fn prefer_active(&self) -> bool {
        self.prefer_active
    }
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            prefer_active: true,
        }
    }
}

/// The answer to an allocation request.
///
/// `state`, `updated_at` and `stale_age_sec` describe the previous occupant and are only
/// present when a slot is reclaimed. A reclaimed occupant without a state is sent as an
/// explicit `"state": null`, hence the nested option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub ok: bool,
    pub mode: AllocationMode,
    pub total_slots: i64,
    pub job_id: i64,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub state: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_age_sec: Option<i64>,
    pub checkpoint_pos: String,
}

/// Maps a key that is present, even as `null`, to `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl SlotAssignment {
    /// State of the reclaimed slot's previous occupant, if it had one.
    pub fn previous_state(&self) -> Option<&str> {
        self.state.as_ref().and_then(|state| state.as_deref())
    }

    /// The assigned slot, or `EmptyLeaseTable` if the allocator had nothing to hand out.
    pub fn slot_id(&self) -> Result<i64, SlotError> {
        if self.job_id < 0 {
            Err(SlotError::EmptyLeaseTable)
        } else {
            Ok(self.job_id)
        }
    }
}

/// Smallest slot in `[0, total_slots)` that does not appear in `occupied`.
/// `occupied` must be sorted ascending; ids outside the window are skipped.
pub fn first_free_slot<I>(occupied: I, total_slots: i64) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    let mut candidate = 0;
    for slot_id in occupied {
        match slot_id.cmp(&candidate) {
            Ordering::Less => continue,
            Ordering::Greater => break,
            Ordering::Equal => candidate += 1,
        }
        if candidate >= total_slots {
            return None;
        }
    }
    (candidate < total_slots).then_some(candidate)
}

/// Never-stamped leases first, then oldest `updated_at`, then lowest slot id.
pub fn staleness_order(a: &SlotLease, b: &SlotLease) -> Ordering {
    // Option orders None before Some, which is exactly "null is the stalest".
    a.updated_at
        .cmp(&b.updated_at)
        .then_with(|| a.slot_id.cmp(&b.slot_id))
}

pub fn stalest<'a, I>(leases: I) -> Option<&'a SlotLease>
where
    I: IntoIterator<Item = &'a SlotLease>,
{
    leases.into_iter().min_by(|a, b| staleness_order(a, b))
}

impl AllocationSnapshot {
    /// Builds a snapshot from leases sorted by slot id, as held by an in-process store.
    ///
    /// Only the free-slot search is bounded by `total_slots`; reclaim candidates are drawn
    /// from every lease in the table.
    pub fn from_sorted_leases<'a, I>(leases: I, total_slots: i64, prefer_active: bool) -> Self
    where
        I: IntoIterator<Item = &'a SlotLease>,
    {
        let leases: Vec<&SlotLease> = leases.into_iter().collect();

        let first_free = first_free_slot(leases.iter().map(|lease| lease.slot_id), total_slots);
        if first_free.is_some() {
            return Self {
                first_free,
                ..Default::default()
            };
        }

        let stalest_active = if prefer_active {
            stalest(leases.iter().copied().filter(|lease| !lease.is_terminal())).cloned()
        } else {
            None
        };

        Self {
            first_free: None,
            stalest_active,
            stalest_any: stalest(leases.iter().copied()).cloned(),
        }
    }
}

/// The allocation decision, given a snapshot of the lease table and the current Unix second.
pub fn decide(request: AllocationRequest, snapshot: AllocationSnapshot, now: i64) -> SlotAssignment {
    if let Some(slot_id) = snapshot.first_free {
        return SlotAssignment {
            ok: true,
            mode: AllocationMode::Free,
            total_slots: request.total_slots(),
            job_id: slot_id,
            state: None,
            updated_at: None,
            stale_age_sec: None,
            checkpoint_pos: ORIGIN_CHECKPOINT.to_owned(),
        };
    }

    // Every active slot may be finished, in which case we still hand out the globally stalest one.
    let candidate = if request.prefer_active() {
        snapshot.stalest_active.or(snapshot.stalest_any)
    } else {
        snapshot.stalest_any
    };

    match candidate {
        Some(lease) => SlotAssignment {
            ok: true,
            mode: AllocationMode::ReclaimStale,
            total_slots: request.total_slots(),
            job_id: lease.slot_id,
            state: Some(lease.state),
            updated_at: Some(lease.updated_at.unwrap_or(0)),
            stale_age_sec: Some(
                lease
                    .updated_at
                    .map(|updated_at| now.saturating_sub(updated_at))
                    .unwrap_or(0),
            ),
            checkpoint_pos: lease
                .checkpoint_pos
                .unwrap_or_else(|| ORIGIN_CHECKPOINT.to_owned()),
        },
        None => SlotAssignment {
            ok: true,
            mode: AllocationMode::ReclaimStale,
            total_slots: request.total_slots(),
            job_id: NO_SLOT,
            state: Some(None),
            updated_at: Some(0),
            stale_age_sec: Some(0),
            checkpoint_pos: ORIGIN_CHECKPOINT.to_owned(),
        },
    }
}

pub async fn allocate_slot(
    store: &dyn LeaseStore,
    request: AllocationRequest,
    now: i64,
) -> Result<SlotAssignment, SlotError> {
    let snapshot = store
        .allocation_snapshot(request.total_slots(), request.prefer_active())
        .await?;

    Ok(decide(request, snapshot, now))
}
