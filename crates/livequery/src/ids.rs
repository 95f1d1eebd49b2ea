//! Live query id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::LiveQueryId;

/// Source of live query ids. Ids must be unique and strictly increasing.
pub trait IdSource: Send + Sync + 'static {
    fn next_id(&self) -> LiveQueryId;
}

static PROCESS_NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Process-wide counter; the default for every [`LiveQueryManager`](crate::LiveQueryManager).
///
/// Temporary views are per session, so two managers sharing a session must
/// never hand out the same id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessIds;

impl IdSource for ProcessIds {
    fn next_id(&self) -> LiveQueryId {
        LiveQueryId(PROCESS_NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Counter owned by one manager. Useful when a test needs predictable view names.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> LiveQueryId {
        LiveQueryId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
