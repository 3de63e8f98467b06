//! Batch selection
//!
//! A batch is the bounded set of objects that goes into one zip fragment.
//! Selection is a single pass over a listing page in key order, stopping as
//! soon as either bound would be crossed. Selection is pure: the caller
//! threads `last_scanned` back into the next listing call as the cursor.
//!
//! Cursor semantics: `total_scanned` and `last_scanned` only cover objects
//! that were *consumed* from the listing. An object that would overflow the
//! batch is left unconsumed, so the next batch sees it again as its first
//! candidate — an oversized object is then archived alone rather than
//! dropped.

use serde::{Deserialize, Serialize};

use crate::store::ObjectInfo;

/// Size and count bounds for one batch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchPolicy {
    /// Maximum number of selected objects (None = unbounded)
    pub max_count: Option<usize>,

    /// Maximum cumulative selected bytes (None = unbounded)
    pub max_size: Option<u64>,
}

impl BatchPolicy {
    /// Policy with no bounds
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Outcome of selecting one batch from a listing page
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Objects selected for this batch, in listing order
    pub selected: Vec<ObjectInfo>,

    /// Number of descriptors consumed from the listing (selected or skipped)
    pub total_scanned: usize,

    /// Last consumed descriptor; its key is the cursor for the next batch
    pub last_scanned: Option<ObjectInfo>,
}

impl BatchOutcome {
    /// Cumulative size of the selected objects
    pub fn selected_bytes(&self) -> u64 {
        self.selected.iter().map(|o| o.size).sum()
    }

    /// Nothing was selected and nothing was consumed: the listing is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.total_scanned == 0
    }
}

/// Select one bounded batch from `objects`, in order
///
/// Folder placeholder keys (ending in `/`) are consumed but never selected,
/// which is how a page can yield an empty batch while the listing still
/// advances. An object larger than `max_size` is accepted alone when the
/// batch is empty; otherwise scanning stops before it and it is re-offered
/// to the next batch.
pub fn select_batch(objects: &[ObjectInfo], policy: &BatchPolicy) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let mut accumulated: u64 = 0;

    for object in objects {
        if object.is_placeholder() {
            outcome.total_scanned += 1;
            outcome.last_scanned = Some(object.clone());
            continue;
        }

        if let Some(max_size) = policy.max_size {
            if object.size > max_size {
                if outcome.selected.is_empty() {
                    tracing::warn!(
                        key = %object.key,
                        size = object.size,
                        max_size,
                        "object exceeds max fragment size; archiving it alone"
                    );
                    accumulated += object.size;
                    outcome.selected.push(object.clone());
                    outcome.total_scanned += 1;
                    outcome.last_scanned = Some(object.clone());
                }
                // Batch already holds objects: leave this one unconsumed
                break;
            }
            if accumulated + object.size > max_size {
                // Would overflow: leave it for the next batch
                break;
            }
        }

        accumulated += object.size;
        outcome.selected.push(object.clone());
        outcome.total_scanned += 1;
        outcome.last_scanned = Some(object.clone());

        if policy.max_count == Some(outcome.selected.len()) {
            break;
        }
    }

    outcome
}
