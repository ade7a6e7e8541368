//! Shared per-message node cache.
//!
//! Each message ever touched by a chain walk or sent as a response gets one
//! entry, created as an empty placeholder and populated at most once under
//! its own async mutex. The per-node mutex is the only ordering primitive:
//! concurrent walks reaching the same unpopulated node serialize on it, and
//! eviction acquires it before removal so destruction cannot race a
//! first-time population.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::debug;

use borane_openai::ChatMessage;

use crate::platform::{ChannelId, MessageId};

/// Identifier link from a message to the one it conversationally continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextLink {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// Memoized conversation state for one chat message.
///
/// `data` and `next` are written exactly once, under the node's mutex;
/// the flags record degraded extraction rather than errors.
#[derive(Debug, Default)]
pub struct NodeState {
    pub data: Option<ChatMessage>,
    pub next: Option<NextLink>,
    pub too_much_text: bool,
    pub too_many_images: bool,
    pub has_bad_attachments: bool,
    pub fetch_next_failed: bool,
}

impl NodeState {
    pub fn is_populated(&self) -> bool {
        self.data.is_some()
    }
}

pub type NodeHandle = Arc<Mutex<NodeState>>;

/// Bounded mapping from message id to its conversation node.
///
/// The map mutex is never held across an await; per-key mutual exclusion
/// comes from the node mutexes themselves.
pub struct NodeCache {
    nodes: StdMutex<HashMap<MessageId, NodeHandle>>,
    capacity: usize,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: StdMutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the node for `id`, inserting an empty placeholder if absent.
    pub fn get_or_create(&self, id: MessageId) -> NodeHandle {
        let mut nodes = self.nodes.lock().expect("node cache lock poisoned");
        Arc::clone(nodes.entry(id).or_default())
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().expect("node cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.nodes
            .lock()
            .expect("node cache lock poisoned")
            .contains_key(&id)
    }

    /// All cached ids in ascending order. Ids are snowflakes, so this is
    /// oldest first.
    pub fn sorted_ids(&self) -> Vec<MessageId> {
        let nodes = self.nodes.lock().expect("node cache lock poisoned");
        let mut ids: Vec<MessageId> = nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes the oldest entries until the cache is back under capacity.
    ///
    /// Each node's mutex is acquired before its entry is removed, so a node
    /// currently being populated or read is never deleted out from under
    /// the task holding it.
    pub async fn evict(&self) {
        let excess: Vec<(MessageId, NodeHandle)> = {
            let nodes = self.nodes.lock().expect("node cache lock poisoned");
            if nodes.len() <= self.capacity {
                return;
            }
            let mut ids: Vec<MessageId> = nodes.keys().copied().collect();
            ids.sort_unstable();
            ids.truncate(nodes.len() - self.capacity);
            ids.into_iter()
                .map(|id| (id, Arc::clone(&nodes[&id])))
                .collect()
        };

        for (id, node) in excess {
            let _guard = node.lock().await;
            self.nodes
                .lock()
                .expect("node cache lock poisoned")
                .remove(&id);
            debug!(id, "evicted message node");
        }
    }
}
