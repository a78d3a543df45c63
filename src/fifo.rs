//! The FIFO group serializer (§4.5): preserves per-`message-group-id` order
//! while running distinct groups in parallel, subject to `max-concurrent`
//! measured in groups in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::decode::DecodedMessage;
use crate::manager::MessageManager;
use crate::registry::HandlerStatus;

struct GroupQueue {
    pending: VecDeque<DecodedMessage>,
    worker_running: bool,
}

/// Partitions admitted messages by `message-group-id` and runs at most one
/// worker per group, admitting new groups only while a concurrency slot is
/// free. The heartbeater (owned by the wrapped [`MessageManager`]) treats
/// every in-flight message identically regardless of grouping (§4.5).
pub struct FifoGroupSerializer {
    manager: Arc<MessageManager>,
    max_concurrent_groups: usize,
    active_groups: Arc<AtomicUsize>,
    groups: Mutex<HashMap<String, GroupQueue>>,
}

impl FifoGroupSerializer {
    pub fn new(manager: Arc<MessageManager>, max_concurrent_groups: usize) -> Arc<Self> {
        Arc::new(Self {
            manager,
            max_concurrent_groups,
            active_groups: Arc::new(AtomicUsize::new(0)),
            groups: Mutex::new(HashMap::new()),
        })
    }

    /// Number of messages currently tracked as in-flight by the underlying
    /// manager (used by the poller for admission control, §4.3 step 2).
    pub fn in_flight_count(&self) -> usize {
        self.manager.in_flight_count()
    }

    /// Admit a decoded message into its group's queue (§4.5 "Implementation").
    /// If the group has no active worker and a concurrency slot is free, a
    /// worker task is spawned immediately; otherwise the message waits
    /// behind its group's existing worker.
    pub fn admit(self: &Arc<Self>, decoded: DecodedMessage) {
        let group_id = decoded
            .envelope
            .sqs_group_id()
            .map(str::to_string)
            .unwrap_or_default();

        let should_spawn = {
            let mut groups = self.groups.lock().unwrap();
            let entry = groups.entry(group_id.clone()).or_insert_with(|| GroupQueue {
                pending: VecDeque::new(),
                worker_running: false,
            });
            entry.pending.push_back(decoded);
            if entry.worker_running {
                false
            } else if self.active_groups.load(Ordering::SeqCst) < self.max_concurrent_groups {
                entry.worker_running = true;
                self.active_groups.fetch_add(1, Ordering::SeqCst);
                true
            } else {
                false
            }
        };

        if should_spawn {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_group(group_id).await });
        }
    }

    /// Run one group's queue to exhaustion: strictly sequential invocation
    /// in arrival order, skipping everything queued after the first failure
    /// within this admission (§4.5 Skip-on-failure).
    async fn run_group(self: Arc<Self>, group_id: String) {
        loop {
            let next = {
                let mut groups = self.groups.lock().unwrap();
                let queue = groups.get_mut(&group_id).expect("group exists while worker runs");
                queue.pending.pop_front()
            };
            let Some(decoded) = next else {
                break;
            };

            let status = self.manager.process(decoded).await;
            if status == HandlerStatus::Failed {
                self.skip_remaining(&group_id);
                break;
            }
        }

        let mut groups = self.groups.lock().unwrap();
        if let Some(queue) = groups.get_mut(&group_id) {
            queue.worker_running = false;
            if queue.pending.is_empty() {
                groups.remove(&group_id);
            }
        }
        drop(groups);
        self.active_groups.fetch_sub(1, Ordering::SeqCst);
    }

    /// Skip every message still queued for `group_id` after a failure,
    /// marking each released and reporting a failure without invoking its
    /// handler (§4.5).
    fn skip_remaining(&self, group_id: &str) {
        let remaining: Vec<DecodedMessage> = {
            let mut groups = self.groups.lock().unwrap();
            match groups.get_mut(group_id) {
                Some(queue) => queue.pending.drain(..).collect(),
                None => Vec::new(),
            }
        };
        for decoded in remaining {
            self.manager
                .skip(&decoded.envelope, "skipped after earlier failure in the same FIFO group");
        }
    }
}
