//! Deterministic single-threaded task queue.
//!
//! All card work that suspends (debounce timers, settlement timeouts,
//! paint callbacks, deferred relaunches) is a task with a due instant on
//! the virtual clock. Tasks run strictly ordered by due time, then by
//! enqueue sequence, so interleavings are reproducible.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use crate::card::CardId;

/// Cancellation token for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TaskKind {
    /// Debounce window elapsed; begin (or defer) a resize pass.
    Debounce(CardId),
    /// Bounded settlement wait of an engine pass ran out.
    PassTimeout(CardId),
    /// Bounded wait of an explicit `wait_for_images` call ran out.
    WaitTimeout(CardId),
    /// Next paint opportunity; hide the loading overlay.
    Frame(CardId),
    /// Fresh-turn relaunch of a pass with the remembered pending width.
    Relaunch(CardId, f64),
}

#[derive(Debug)]
struct Entry {
    due: Duration,
    seq: u64,
    id: TaskId,
    kind: TaskKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for earliest-first ordering.
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    now: Duration,
    queue: BinaryHeap<Entry>,
    canceled: HashSet<TaskId>,
    next_id: u64,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, delay: Duration, kind: TaskKind) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.next_seq += 1;
        self.queue.push(Entry {
            due: self.now + delay,
            seq: self.next_seq,
            id,
            kind,
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) {
        self.canceled.insert(id);
    }

    /// Pop the earliest live task due at or before `limit`, advancing the
    /// clock to its due instant. Returns `None` once nothing is due.
    pub fn pop_due(&mut self, limit: Duration) -> Option<(TaskId, TaskKind)> {
        while let Some(head) = self.queue.peek() {
            if head.due > limit {
                return None;
            }
            let entry = self.queue.pop().expect("peeked entry vanished");
            if self.canceled.remove(&entry.id) {
                continue;
            }
            if entry.due > self.now {
                self.now = entry.due;
            }
            return Some((entry.id, entry.kind));
        }
        None
    }

    /// Move the clock forward after all due tasks drained.
    pub fn settle_clock(&mut self, limit: Duration) {
        if limit > self.now {
            self.now = limit;
        }
    }
}
