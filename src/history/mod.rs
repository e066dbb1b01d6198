//! Node execution history: the in-memory window the adaptive scheduler
//! reads, and a SQLite store that persists it between invocations

mod schema;
mod store;

pub use store::{HistoryStore, NodeRunRecord};

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

/// Samples kept per node
pub const HISTORY_WINDOW: usize = 10;

/// Final outcome of one node in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub success: bool,
    pub duration: Duration,
}

/// Aggregate over a node's recent samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeStats {
    pub samples: usize,
    pub success_rate: f64,
    pub mean_duration: Duration,
}

impl NodeStats {
    fn from_samples<'a>(samples: impl ExactSizeIterator<Item = &'a Sample>) -> Option<Self> {
        let count = samples.len();
        if count == 0 {
            return None;
        }
        let (successes, total) = samples.fold((0usize, Duration::ZERO), |(ok, total), s| {
            (ok + usize::from(s.success), total + s.duration)
        });
        Some(Self {
            samples: count,
            success_rate: successes as f64 / count as f64,
            mean_duration: total / count as u32,
        })
    }
}

/// Key under which a node's samples are kept
pub fn history_key(workflow: &str, node: &str) -> String {
    if workflow.is_empty() {
        node.to_string()
    } else {
        format!("{workflow}/{node}")
    }
}

/// Thread-safe per-node ring of the last [`HISTORY_WINDOW`] samples.
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    samples: RwLock<HashMap<String, VecDeque<Sample>>>,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, sample: Sample) {
        let mut samples = self
            .samples
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ring = samples.entry(key.to_string()).or_default();
        if ring.len() == HISTORY_WINDOW {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    pub fn stats(&self, key: &str) -> Option<NodeStats> {
        let samples = self
            .samples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        samples.get(key).and_then(|ring| NodeStats::from_samples(ring.iter()))
    }

    /// Stats for every recorded key, sorted by key
    pub fn all_stats(&self) -> Vec<(String, NodeStats)> {
        let samples = self
            .samples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stats: Vec<(String, NodeStats)> = samples
            .iter()
            .filter_map(|(key, ring)| NodeStats::from_samples(ring.iter()).map(|s| (key.clone(), s)))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(success: bool, ms: u64) -> Sample {
        Sample {
            success,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_stats_empty() {
        let history = ExecutionHistory::new();
        assert!(history.stats("missing").is_none());
        assert!(history.is_empty());
    }

    #[test]
    fn test_stats_mean_and_rate() {
        let history = ExecutionHistory::new();
        history.record("wf/a", sample(true, 100));
        history.record("wf/a", sample(false, 300));

        let stats = history.stats("wf/a").unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.mean_duration, Duration::from_millis(200));
    }

    #[test]
    fn test_window_keeps_last_ten() {
        let history = ExecutionHistory::new();
        for _ in 0..5 {
            history.record("n", sample(false, 10));
        }
        for _ in 0..HISTORY_WINDOW {
            history.record("n", sample(true, 10));
        }
        let stats = history.stats("n").unwrap();
        assert_eq!(stats.samples, HISTORY_WINDOW);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn test_history_key() {
        assert_eq!(history_key("deploy", "build"), "deploy/build");
        assert_eq!(history_key("", "build"), "build");
    }

    #[test]
    fn test_all_stats_sorted() {
        let history = ExecutionHistory::new();
        history.record("b", sample(true, 1));
        history.record("a", sample(true, 1));
        let keys: Vec<String> = history.all_stats().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
