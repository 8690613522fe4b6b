//! Image settlement tracking.
//!
//! A tracker observes the images present in a content region at the moment
//! it is created; images added later belong to the next tracker. It
//! resolves exactly once: when every tracked image reaches a terminal
//! state, or when the caller's timeout task fires, whichever is first.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::dom::{Document, ImageState, NodeId};

/// Outcome of one settlement wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub all_loaded: bool,
    pub failed: u32,
    pub total: u32,
    pub timed_out: bool,
}

impl SettlementReport {
    fn empty() -> Self {
        Self {
            all_loaded: true,
            failed: 0,
            total: 0,
            timed_out: false,
        }
    }
}

#[derive(Debug)]
struct ImageRecord {
    node: NodeId,
    /// Set once the image contributed to the settled count; re-entrant
    /// transitions must not double-count.
    counted: bool,
    failed: bool,
}

/// Tracks the fixed image set of one wait.
#[derive(Debug)]
pub struct SettlementTracker {
    records: Vec<ImageRecord>,
    settled: u32,
    resolved: Option<SettlementReport>,
}

impl SettlementTracker {
    /// Enumerate images under `region` and count those already terminal.
    /// A node that cannot be inspected counts as failed, not a crash.
    pub fn observe(doc: &Document, region: NodeId) -> Self {
        let mut tracker = Self {
            records: Vec::new(),
            settled: 0,
            resolved: None,
        };
        for node in doc.images_under(region) {
            let state = doc.image_state(node);
            let mut record = ImageRecord {
                node,
                counted: false,
                failed: false,
            };
            match state {
                Some(ImageState::Loaded(_)) => {
                    record.counted = true;
                    tracker.settled += 1;
                }
                Some(ImageState::Failed) | None => {
                    record.counted = true;
                    record.failed = true;
                    tracker.settled += 1;
                }
                Some(ImageState::Pending) => {}
            }
            tracker.records.push(record);
        }
        tracker.try_resolve();
        tracker
    }

    pub fn total(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn report(&self) -> Option<SettlementReport> {
        self.resolved
    }

    /// Record a load/error transition for `node`. Counts each image at
    /// most once; unknown nodes are ignored. Returns the final report when
    /// this transition completed the wait.
    pub fn note_settled(&mut self, node: NodeId, ok: bool) -> Option<SettlementReport> {
        if self.resolved.is_some() {
            return None;
        }
        let Some(record) = self.records.iter_mut().find(|record| record.node == node) else {
            return None;
        };
        if record.counted {
            return None;
        }
        record.counted = true;
        record.failed = !ok;
        self.settled += 1;
        self.try_resolve()
    }

    /// Resolve now because the timeout elapsed. Still-pending images are
    /// reported as failed, but their loads are not cancelled.
    pub fn resolve_timed_out(&mut self) -> Option<SettlementReport> {
        if self.resolved.is_some() {
            return None;
        }
        let failed = self
            .records
            .iter()
            .filter(|record| record.failed || !record.counted)
            .count() as u32;
        let report = SettlementReport {
            all_loaded: failed == 0,
            failed,
            total: self.total(),
            timed_out: true,
        };
        self.resolved = Some(report);
        Some(report)
    }

    fn try_resolve(&mut self) -> Option<SettlementReport> {
        if self.resolved.is_some() || self.settled < self.total() {
            return None;
        }
        if self.records.is_empty() {
            self.resolved = Some(SettlementReport::empty());
            return self.resolved;
        }
        let failed = self.records.iter().filter(|record| record.failed).count() as u32;
        let report = SettlementReport {
            all_loaded: failed == 0,
            failed,
            total: self.total(),
            timed_out: false,
        };
        self.resolved = Some(report);
        Some(report)
    }

    /// Nodes still pending at this instant.
    pub fn pending_nodes(&self) -> Vec<NodeId> {
        self.records
            .iter()
            .filter(|record| !record.counted)
            .map(|record| record.node)
            .collect()
    }
}

/// Shared resolution cell handed out by `wait_for_images`. The runtime
/// fills it when the underlying tracker resolves.
#[derive(Clone, Default)]
pub struct SettlementWait {
    cell: Arc<Mutex<Option<SettlementReport>>>,
}

impl SettlementWait {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(report: SettlementReport) -> Self {
        let wait = Self::new();
        wait.fill(report);
        wait
    }

    pub(crate) fn fill(&self, report: SettlementReport) {
        let mut guard = self.cell.lock().expect("settlement cell poisoned");
        // First resolution wins.
        if guard.is_none() {
            *guard = Some(report);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.report().is_some()
    }

    pub fn report(&self) -> Option<SettlementReport> {
        *self.cell.lock().expect("settlement cell poisoned")
    }
}
