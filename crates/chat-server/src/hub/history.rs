//! Bounded replay buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use chat_core::Envelope;

#[derive(Debug)]
struct Entry {
    envelope: Envelope,
    frame: Arc<String>,
}

/// Chat and roster envelopes in arrival order, capped at `limit`.
///
/// Each entry keeps its encoded frame so replays never re-serialize.
#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<Entry>,
    limit: usize,
}

impl HistoryBuffer {
    /// Empty buffer holding at most `limit` envelopes.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Append an envelope with its encoded frame, evicting the oldest entry
    /// when full. Pings are refused and `false` is returned.
    pub fn record(&mut self, envelope: Envelope, frame: Arc<String>) -> bool {
        if matches!(envelope, Envelope::Ping(_)) || self.limit == 0 {
            return false;
        }
        while self.entries.len() >= self.limit {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(Entry { envelope, frame });
        true
    }

    /// Encoded frames in original order, for replay.
    pub fn frames(&self) -> Vec<Arc<String>> {
        self.entries.iter().map(|e| Arc::clone(&e.frame)).collect()
    }

    /// Recorded envelopes in original order.
    pub fn envelopes(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter().map(|e| &e.envelope)
    }

    /// Number of recorded envelopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capacity.
    pub fn limit(&self) -> usize {
        self.limit
    }
}
