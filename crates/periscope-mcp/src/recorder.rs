//! Bounded in-memory history of raw protocol traffic.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::HISTORY_CAPACITY;

/// Which way a record travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Client to server.
    Sent,
    /// Server to client.
    Received,
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRecord {
    /// Monotonic sequence number across all servers.
    pub seq: u64,
    /// Direction.
    pub direction: Direction,
    /// Server the message was exchanged with.
    pub server_id: String,
    /// Message body.
    pub payload: Value,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct History {
    records: VecDeque<InteractionRecord>,
    next_seq: u64,
}

/// FIFO ring buffer of the latest interactions, oldest evicted first.
#[derive(Debug)]
pub struct InteractionRecorder {
    history: RwLock<History>,
    capacity: usize,
}

impl Default for InteractionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionRecorder {
    /// Recorder holding the latest [`HISTORY_CAPACITY`] records.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Recorder with a smaller bound. Capped at [`HISTORY_CAPACITY`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, HISTORY_CAPACITY);
        Self {
            history: RwLock::new(History {
                records: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Maximum number of records kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full. Returns its sequence number.
    pub fn record(&self, direction: Direction, server_id: &str, payload: Value) -> u64 {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let seq = history.next_seq;
        history.next_seq = seq.wrapping_add(1);
        while history.records.len() >= self.capacity {
            history.records.pop_front();
        }
        history.records.push_back(InteractionRecord {
            seq,
            direction,
            server_id: server_id.to_string(),
            payload,
            timestamp: Utc::now(),
        });
        seq
    }

    /// All retained records in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InteractionRecord> {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        history.records.iter().cloned().collect()
    }

    /// Retained records for one server, in arrival order.
    #[must_use]
    pub fn for_server(&self, server_id: &str) -> Vec<InteractionRecord> {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        history
            .records
            .iter()
            .filter(|r| r.server_id == server_id)
            .cloned()
            .collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    /// Whether nothing has been recorded (or everything was cleared).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all records. Sequence numbers keep counting.
    pub fn clear(&self) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clear();
    }
}
