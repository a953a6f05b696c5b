//! Per-channel priority queues with delayed visibility
//!
//! Each channel owns a ready heap (priority descending, then enqueue order)
//! and a delayed heap keyed by visibility time. Scheduled notifications sit
//! in the delayed heap until due, then promote into the ready heap. Dequeue
//! is async: workers park on a per-channel `Notify` and a timer for the
//! earliest delayed entry. Cancellation removes an entry only while it is
//! still queued; once a worker has dequeued it, the store's status CAS is
//! the arbiter.

use chrono::{DateTime, Utc};
use courier_shared::{ChannelKind, Priority};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Entry visible to workers right now
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    id: Uuid,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; FIFO within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Entry waiting for its visibility time
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelayedEntry {
    visible_at: DateTime<Utc>,
    priority: Priority,
    seq: u64,
    id: Uuid,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.visible_at
            .cmp(&other.visible_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct ChannelHeaps {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
}

struct ChannelQueue {
    heaps: Mutex<ChannelHeaps>,
    notify: Notify,
}

/// Priority queues for all channels
pub struct QueueManager {
    queues: HashMap<ChannelKind, ChannelQueue>,
    seq: AtomicU64,
    shutdown: CancellationToken,
}

impl QueueManager {
    pub fn new() -> Self {
        let queues = ChannelKind::ALL
            .into_iter()
            .map(|channel| {
                (
                    channel,
                    ChannelQueue {
                        heaps: Mutex::new(ChannelHeaps::default()),
                        notify: Notify::new(),
                    },
                )
            })
            .collect();

        Self {
            queues,
            seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    fn queue(&self, channel: ChannelKind) -> &ChannelQueue {
        // Construction covers ChannelKind::ALL.
        self.queues.get(&channel).expect("queue for every channel")
    }

    /// Add a notification to its channel queue. A `visible_at` in the past
    /// (or `None`) makes it immediately dispatchable.
    pub fn enqueue(
        &self,
        channel: ChannelKind,
        id: Uuid,
        priority: Priority,
        visible_at: Option<DateTime<Utc>>,
    ) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        let queue = self.queue(channel);
        {
            let mut heaps = queue.heaps.lock();
            match visible_at.filter(|at| *at > Utc::now()) {
                Some(at) => heaps.delayed.push(Reverse(DelayedEntry {
                    visible_at: at,
                    priority,
                    seq,
                    id,
                })),
                None => heaps.ready.push(ReadyEntry { priority, seq, id }),
            }
        }
        // notify_one stores a permit when no worker is parked yet, so an
        // enqueue landing between a worker's heap check and its await is
        // never lost.
        queue.notify.notify_one();
    }

    /// Wait for the next visible entry on a channel. Returns `None` once the
    /// queue manager is shut down.
    pub async fn dequeue(&self, channel: ChannelKind) -> Option<Uuid> {
        let queue = self.queue(channel);
        loop {
            let (entry, next_due) = {
                let mut heaps = queue.heaps.lock();
                Self::promote_due(&mut heaps);
                let entry = heaps.ready.pop().map(|e| e.id);
                let next_due = heaps.delayed.peek().map(|Reverse(e)| e.visible_at);
                (entry, next_due)
            };

            if let Some(id) = entry {
                return Some(id);
            }
            if self.shutdown.is_cancelled() {
                return None;
            }

            let sleep_for = next_due
                .map(|due| (due - Utc::now()).to_std().unwrap_or_default())
                .unwrap_or(std::time::Duration::from_secs(3600));

            tokio::select! {
                _ = queue.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    fn promote_due(heaps: &mut ChannelHeaps) {
        let now = Utc::now();
        while let Some(Reverse(head)) = heaps.delayed.peek() {
            if head.visible_at > now {
                break;
            }
            let Reverse(entry) = heaps.delayed.pop().expect("peeked entry");
            heaps.ready.push(ReadyEntry {
                priority: entry.priority,
                seq: entry.seq,
                id: entry.id,
            });
        }
    }

    /// Remove a queued or scheduled entry. Returns false if the entry is no
    /// longer queued (already dispatched or never enqueued).
    pub fn cancel(&self, id: Uuid) -> bool {
        for queue in self.queues.values() {
            let mut heaps = queue.heaps.lock();
            let ready_before = heaps.ready.len();
            let delayed_before = heaps.delayed.len();
            heaps.ready.retain(|e| e.id != id);
            heaps.delayed.retain(|Reverse(e)| e.id != id);
            if heaps.ready.len() < ready_before || heaps.delayed.len() < delayed_before {
                return true;
            }
        }
        false
    }

    /// Entries currently queued (ready + scheduled) on one channel
    pub fn depth(&self, channel: ChannelKind) -> usize {
        let heaps = self.queue(channel).heaps.lock();
        heaps.ready.len() + heaps.delayed.len()
    }

    /// Queue depths for every channel
    pub fn depths(&self) -> HashMap<ChannelKind, usize> {
        ChannelKind::ALL
            .into_iter()
            .map(|channel| (channel, self.depth(channel)))
            .collect()
    }

    /// Unblock all waiting workers; subsequent dequeues drain what is ready
    /// and then return `None`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for queue in self.queues.values() {
            queue.notify.notify_waiters();
        }
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}
