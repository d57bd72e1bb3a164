//! # Slot leases
//!
//! One lease record exists per slot. Every field other than the slot id is
//! independently nullable, and partial updates never clear a field that the
//! caller did not send.
use serde::{Deserialize, Serialize};

/// Lease states that mark a slot's work as finished. Matching is case-insensitive.
pub const TERMINAL_STATES: [&str; 5] = ["done", "finished", "complete", "completed", "ok"];

/// State stamped by workers while they hold a slot.
pub const RUNNING_STATE: &str = "running";

/// State stamped by workers once their range is exhausted.
pub const DONE_STATE: &str = "done";

/// Returns true if `state` is one of the terminal states. A missing state is not terminal.
pub fn is_terminal_state(state: Option<&str>) -> bool {
    match state {
        Some(state) => {
            let lowered = state.to_lowercase();
            TERMINAL_STATES.contains(&lowered.as_str())
        }
        None => false,
    }
}

/// The persisted record for a single slot.
///
/// `slot_id` is exposed as `job_id` on the wire, which is the name workers have always used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotLease {
    #[serde(rename = "job_id")]
    pub slot_id: i64,
    pub state: Option<String>,
    pub checkpoint_pos: Option<String>, // Opaque resume token, never parsed
    pub updated_at: Option<i64>,        // Unix seconds, None means the lease was never stamped
    pub start_pos: Option<String>,
    pub end_pos: Option<String>,
    pub chunk_size: Option<i64>,
}

impl SlotLease {
    /// A lease with every field unset, as stored for a slot before any patch is applied.
    pub fn empty(slot_id: i64) -> Self {
        Self {
            slot_id,
            state: None,
            checkpoint_pos: None,
            updated_at: None,
            start_pos: None,
            end_pos: None,
            chunk_size: None,
        }
    }

    /// Builds the record an upsert creates when no lease exists yet for `slot_id`.
    pub fn from_patch(slot_id: i64, patch: &LeasePatch) -> Self {
        let mut lease = Self::empty(slot_id);
        lease.merge(patch);
        lease
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal_state(self.state.as_deref())
    }

    /// Applies `patch` field by field: set fields overwrite, unset fields keep the stored value.
    pub fn merge(&mut self, patch: &LeasePatch) {
        keep_existing(&mut self.state, &patch.state);
        keep_existing(&mut self.checkpoint_pos, &patch.checkpoint_pos);
        keep_existing(&mut self.updated_at, &patch.updated_at);
        keep_existing(&mut self.start_pos, &patch.start_pos);
        keep_existing(&mut self.end_pos, &patch.end_pos);
        keep_existing(&mut self.chunk_size, &patch.chunk_size);
    }
}

fn keep_existing<T: Clone>(current: &mut Option<T>, new: &Option<T>) {
    if let Some(value) = new {
        *current = Some(value.clone());
    }
}

/// A partial update for a lease. `None` means "leave the stored value alone"; there is no
/// way to null out a field once it has been set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_pos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_pos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_pos: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl LeasePatch {
    /// The heartbeat a worker sends while it still holds `checkpoint_pos` worth of progress.
    pub fn running(checkpoint_pos: &str) -> Self {
        Self {
            state: Some(RUNNING_STATE.to_owned()),
            checkpoint_pos: Some(checkpoint_pos.to_owned()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_case_insensitive() {
        for state in ["done", "DONE", "Finished", "complete", "Completed", "oK"] {
            assert!(is_terminal_state(Some(state)), "{state} should be terminal");
        }
        for state in ["running", "", "paused", "done ", "okay"] {
            assert!(!is_terminal_state(Some(state)), "{state} should not be terminal");
        }
        assert!(!is_terminal_state(None));
    }

    #[test]
    fn merge_keeps_fields_missing_from_the_patch() {
        let first = LeasePatch {
            state: Some("running".to_owned()),
            checkpoint_pos: Some("10".to_owned()),
            start_pos: Some("0".to_owned()),
            end_pos: Some("1000".to_owned()),
            chunk_size: Some(1000),
            updated_at: Some(100),
        };
        let mut lease = SlotLease::from_patch(4, &first);

        let second = LeasePatch {
            checkpoint_pos: Some("20".to_owned()),
            updated_at: Some(160),
            ..Default::default()
        };
        lease.merge(&second);

        assert_eq!(
            lease,
            SlotLease {
                slot_id: 4,
                state: Some("running".to_owned()),
                checkpoint_pos: Some("20".to_owned()),
                updated_at: Some(160),
                start_pos: Some("0".to_owned()),
                end_pos: Some("1000".to_owned()),
                chunk_size: Some(1000),
            }
        );
    }

    #[test]
    fn merging_the_same_patch_twice_is_a_no_op() {
        let patch = LeasePatch::running("42");
        let mut lease = SlotLease::from_patch(0, &patch);
        let once = lease.clone();
        lease.merge(&patch);
        assert_eq!(lease, once);
    }

    #[test]
    fn lease_serializes_slot_id_as_job_id_with_explicit_nulls() {
        let lease = SlotLease::from_patch(7, &LeasePatch::running("5"));
        let value = serde_json::to_value(&lease).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "job_id": 7,
                "state": "running",
                "checkpoint_pos": "5",
                "updated_at": null,
                "start_pos": null,
                "end_pos": null,
                "chunk_size": null,
            })
        );
    }

    #[test]
    fn empty_patch() {
        assert!(LeasePatch::default().is_empty());
        assert!(!LeasePatch::running("0").is_empty());
    }
}
