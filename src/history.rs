//! Message history tracking for debugging and diagnostics.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction of a message in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
}

/// A recorded message in the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub msg_type: String,
    pub message: Value,
    /// Seconds since history creation
    pub timestamp: f64,
}

/// Bounded log of the messages a bridge sent and received.
///
/// Besides the rolling entry list, the latest message of every `msgType`
/// is kept per direction.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    latest: HashMap<Direction, HashMap<String, Value>>,
    last_error: Option<String>,
    dropped: u64,
    start_time: Instant,
    entries: Vec<HistoryEntry>,
    max_entries: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHistory {
    pub const DEFAULT_MAX_ENTRIES: usize = 100;

    pub fn new() -> Self {
        Self {
            latest: HashMap::from([
                (Direction::Send, HashMap::new()),
                (Direction::Receive, HashMap::new()),
            ]),
            last_error: None,
            dropped: 0,
            start_time: Instant::now(),
            entries: Vec::new(),
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::new()
        }
    }

    /// Records a message; messages without a `msgType` are ignored.
    pub fn record(&mut self, direction: Direction, message: &Value) {
        let Some(msg_type) = message.get("msgType").and_then(|m| m.as_str()) else {
            return;
        };

        if let Some(type_map) = self.latest.get_mut(&direction) {
            type_map.insert(msg_type.to_string(), message.clone());
        }

        self.entries.push(HistoryEntry {
            direction,
            msg_type: msg_type.to_string(),
            message: message.clone(),
            timestamp: self.start_time.elapsed().as_secs_f64(),
        });

        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
    }

    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
    }

    /// Counts an inbound datagram that could not be parsed.
    pub fn record_dropped(&mut self, error: &str) {
        self.dropped += 1;
        self.record_error(error);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The most recent message of a type in one direction.
    pub fn latest(&self, direction: Direction, msg_type: &str) -> Option<&Value> {
        self.latest.get(&direction).and_then(|m| m.get(msg_type))
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.latest.values_mut().for_each(|m| m.clear());
        self.entries.clear();
        self.last_error = None;
        self.dropped = 0;
    }

    pub fn summary(&self) -> HistorySummary {
        let count = |d: Direction| self.entries.iter().filter(|e| e.direction == d).count();
        HistorySummary {
            send_count: count(Direction::Send),
            receive_count: count(Direction::Receive),
            dropped_count: self.dropped,
            total_entries: self.entries.len(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Summary of message history for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub send_count: usize,
    pub receive_count: usize,
    pub dropped_count: u64,
    pub total_entries: usize,
    pub last_error: Option<String>,
}
