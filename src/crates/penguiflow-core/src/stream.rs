//! Monotonic per-stream chunk numbering (SPEC_FULL.md §4.3).

use dashmap::DashMap;

/// A chunk of streamed output.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamChunk {
    pub stream_id: String,
    pub seq: u64,
    pub payload: ChunkPayload,
    pub done: bool,
}

/// Streamed payload, text or binary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ChunkPayload {
    Text(String),
    Binary(Vec<u8>),
}

/// Per-`stream_id` monotonic counters, owned by a [`crate::runtime::Flow`].
///
/// `next()` atomically reads-and-increments the counter for `stream_id`,
/// creating it at 0 on first use. After a `done=true` chunk the entry is
/// removed, so a later emission on the same id restarts at 0 — the
/// "seq reset" invariant in SPEC_FULL.md §8.
#[derive(Default)]
pub struct StreamSequencer {
    counters: DashMap<String, u64>,
}

impl StreamSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the next sequence number for `stream_id` and, if `done`,
    /// forget the counter so the next emission restarts at 0.
    pub fn next(&self, stream_id: &str, done: bool) -> u64 {
        let mut seq = 0u64;
        self.counters
            .entry(stream_id.to_string())
            .and_modify(|c| {
                seq = *c;
                *c += 1;
            })
            .or_insert_with(|| {
                seq = 0;
                1
            });
        if done {
            self.counters.remove(stream_id);
        }
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic_and_resets_after_done() {
        let seq = StreamSequencer::new();
        assert_eq!(seq.next("a", false), 0);
        assert_eq!(seq.next("a", false), 1);
        assert_eq!(seq.next("a", true), 2);
        // restarts after done
        assert_eq!(seq.next("a", false), 0);
    }

    #[test]
    fn distinct_streams_are_independent() {
        let seq = StreamSequencer::new();
        assert_eq!(seq.next("a", false), 0);
        assert_eq!(seq.next("b", false), 0);
        assert_eq!(seq.next("a", false), 1);
        assert_eq!(seq.next("b", false), 1);
    }
}
