//! Ordering of ready nodes under the four scheduling policies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::definition::NodeId;
use super::resources::{PoolSnapshot, Resources};
use crate::history::NodeStats;

/// How ready nodes are ordered before admission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    #[default]
    PriorityBased,
    DeadlineDriven,
    ResourceAware,
    Adaptive,
}

impl SchedulingPolicy {
    pub const ALL: [SchedulingPolicy; 4] = [
        SchedulingPolicy::PriorityBased,
        SchedulingPolicy::DeadlineDriven,
        SchedulingPolicy::ResourceAware,
        SchedulingPolicy::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingPolicy::PriorityBased => "priority_based",
            SchedulingPolicy::DeadlineDriven => "deadline_driven",
            SchedulingPolicy::ResourceAware => "resource_aware",
            SchedulingPolicy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown scheduling policy '{s}', expected one of: {}",
                    Self::ALL.map(|p| p.as_str()).join(", ")
                )
            })
    }
}

/// A ready node as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: NodeId,
    /// Order in which the node became ready
    pub seq: u64,
    pub priority: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
    pub resources: Resources,
    pub dependency_count: usize,
    pub stats: Option<NodeStats>,
}

impl Candidate {
    pub fn effective_priority(&self, now: DateTime<Utc>) -> u8 {
        self.priority
            .unwrap_or_else(|| dynamic_priority(self.deadline, self.dependency_count, now))
    }
}

/// Priority for nodes that do not declare one: base 5, raised by a close
/// deadline and by fan-in, clamped to 1..=10.
pub fn dynamic_priority(
    deadline: Option<DateTime<Utc>>,
    dependency_count: usize,
    now: DateTime<Utc>,
) -> u8 {
    let mut priority: i64 = 5;
    if let Some(deadline) = deadline {
        let remaining = (deadline - now).num_milliseconds();
        priority += match remaining {
            r if r < 5_000 => 5,
            r if r < 15_000 => 3,
            r if r < 30_000 => 1,
            _ => 0,
        };
    }
    if dependency_count > 2 {
        priority += 2;
    }
    priority.clamp(1, 10) as u8
}

/// Urgency in [0, 1]: 1 at or past the deadline, 0 thirty seconds or more away
fn urgency(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match deadline {
        Some(deadline) => {
            let ttd = (deadline - now).num_milliseconds() as f64;
            (1.0 - ttd / 30_000.0).clamp(0.0, 1.0)
        }
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    policy: SchedulingPolicy,
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Order candidates for admission. Ties keep submission order.
    pub fn select_next(
        &self,
        candidates: &[Candidate],
        pool: &PoolSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<NodeId> {
        let mut ranked: Vec<&Candidate> = candidates.iter().collect();

        match self.policy {
            SchedulingPolicy::PriorityBased => sort_by_priority(&mut ranked, now),
            SchedulingPolicy::DeadlineDriven => ranked.sort_by(|a, b| {
                match (a.deadline, b.deadline) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
                .then(a.seq.cmp(&b.seq))
            }),
            SchedulingPolicy::ResourceAware => sort_by_score(&mut ranked, |c| {
                0.6 * (1.0 - pool.utilization(&c.resources))
                    + 0.4 * f64::from(c.effective_priority(now)) / 10.0
            }),
            SchedulingPolicy::Adaptive => {
                if ranked.iter().all(|c| c.stats.is_none()) {
                    sort_by_priority(&mut ranked, now);
                } else {
                    sort_by_score(&mut ranked, |c| adaptive_score(c, now));
                }
            }
        }

        ranked.into_iter().map(|c| c.id.clone()).collect()
    }
}

fn sort_by_priority(ranked: &mut [&Candidate], now: DateTime<Utc>) {
    ranked.sort_by(|a, b| {
        b.effective_priority(now)
            .cmp(&a.effective_priority(now))
            .then(a.seq.cmp(&b.seq))
    });
}

fn sort_by_score(ranked: &mut [&Candidate], score: impl Fn(&Candidate) -> f64) {
    ranked.sort_by(|a, b| score(b).total_cmp(&score(a)).then(a.seq.cmp(&b.seq)));
}

fn adaptive_score(c: &Candidate, now: DateTime<Utc>) -> f64 {
    let priority = f64::from(c.effective_priority(now)) / 10.0;
    let (success, speed) = match &c.stats {
        Some(stats) if stats.samples > 0 => {
            let mean_ms = stats.mean_duration.as_secs_f64() * 1000.0;
            (stats.success_rate, 1000.0 / (1000.0 + mean_ms))
        }
        _ => (0.5, 0.5),
    };
    0.3 * priority + 0.3 * urgency(c.deadline, now) + 0.2 * success + 0.2 * speed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(id: &str, seq: u64) -> Candidate {
        Candidate {
            id: id.into(),
            seq,
            priority: Some(5),
            deadline: None,
            resources: Resources::ZERO,
            dependency_count: 0,
            stats: None,
        }
    }

    fn pool() -> PoolSnapshot {
        PoolSnapshot {
            capacity: Resources::new(4, 4096, 4),
            available: Resources::new(4, 4096, 4),
        }
    }

    #[test]
    fn test_policy_parse_and_display() {
        for policy in SchedulingPolicy::ALL {
            assert_eq!(policy.to_string().parse::<SchedulingPolicy>().unwrap(), policy);
        }
        assert_eq!(
            "Deadline-Driven".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::DeadlineDriven
        );
        assert!("fifo".parse::<SchedulingPolicy>().is_err());
    }

    #[test]
    fn test_priority_descending_ties_by_submission() {
        let mut high = candidate("high", 3);
        high.priority = Some(9);
        let candidates = vec![candidate("first", 1), candidate("second", 2), high];

        let order = Scheduler::new(SchedulingPolicy::PriorityBased).select_next(
            &candidates,
            &pool(),
            Utc::now(),
        );
        assert_eq!(order, vec!["high", "first", "second"]);
    }

    #[test]
    fn test_deadline_ascending_none_last() {
        let now = Utc::now();
        let mut soon = candidate("soon", 3);
        soon.deadline = Some(now + chrono::Duration::seconds(1));
        let mut later = candidate("later", 2);
        later.deadline = Some(now + chrono::Duration::seconds(60));
        let candidates = vec![candidate("none", 1), later, soon];

        let order = Scheduler::new(SchedulingPolicy::DeadlineDriven).select_next(
            &candidates,
            &pool(),
            now,
        );
        assert_eq!(order, vec!["soon", "later", "none"]);
    }

    #[test]
    fn test_resource_aware_prefers_light_nodes() {
        let mut heavy = candidate("heavy", 1);
        heavy.resources = Resources::new(4, 4096, 4);
        let light = candidate("light", 2);

        let order = Scheduler::new(SchedulingPolicy::ResourceAware).select_next(
            &[heavy, light],
            &pool(),
            Utc::now(),
        );
        assert_eq!(order, vec!["light", "heavy"]);
    }

    #[test]
    fn test_resource_aware_priority_can_outweigh_load() {
        // heavy: 0.6 * (1 - 1/3) + 0.4 = 0.8; light: 0.6 + 0.04 = 0.64
        let mut heavy = candidate("heavy", 1);
        heavy.resources = Resources::new(4, 0, 0);
        heavy.priority = Some(10);
        let mut light = candidate("light", 2);
        light.priority = Some(1);

        let order = Scheduler::new(SchedulingPolicy::ResourceAware).select_next(
            &[light, heavy],
            &pool(),
            Utc::now(),
        );
        assert_eq!(order, vec!["heavy", "light"]);
    }

    #[test]
    fn test_adaptive_without_history_falls_back_to_priority() {
        let mut a = candidate("a", 1);
        a.priority = Some(2);
        let mut b = candidate("b", 2);
        b.priority = Some(7);

        let order =
            Scheduler::new(SchedulingPolicy::Adaptive).select_next(&[a, b], &pool(), Utc::now());
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_adaptive_prefers_reliable_fast_nodes() {
        let mut flaky = candidate("flaky", 1);
        flaky.stats = Some(NodeStats {
            samples: 10,
            success_rate: 0.2,
            mean_duration: Duration::from_secs(10),
        });
        let mut solid = candidate("solid", 2);
        solid.stats = Some(NodeStats {
            samples: 10,
            success_rate: 1.0,
            mean_duration: Duration::from_millis(50),
        });

        let order = Scheduler::new(SchedulingPolicy::Adaptive).select_next(
            &[flaky, solid],
            &pool(),
            Utc::now(),
        );
        assert_eq!(order, vec!["solid", "flaky"]);
    }

    #[test]
    fn test_adaptive_urgency_counts() {
        let now = Utc::now();
        let mut urgent = candidate("urgent", 2);
        urgent.deadline = Some(now + chrono::Duration::milliseconds(500));
        let mut relaxed = candidate("relaxed", 1);
        relaxed.stats = Some(NodeStats {
            samples: 1,
            success_rate: 1.0,
            mean_duration: Duration::from_millis(0),
        });

        let order =
            Scheduler::new(SchedulingPolicy::Adaptive).select_next(&[relaxed, urgent], &pool(), now);
        assert_eq!(order, vec!["urgent", "relaxed"]);
    }

    #[test]
    fn test_dynamic_priority_tiers() {
        let now = Utc::now();
        let at = |ms: i64| Some(now + chrono::Duration::milliseconds(ms));

        assert_eq!(dynamic_priority(None, 0, now), 5);
        assert_eq!(dynamic_priority(at(1_000), 0, now), 10);
        assert_eq!(dynamic_priority(at(10_000), 0, now), 8);
        assert_eq!(dynamic_priority(at(20_000), 0, now), 6);
        assert_eq!(dynamic_priority(at(60_000), 0, now), 5);
        assert_eq!(dynamic_priority(None, 3, now), 7);
        // 5 + 5 + 2 clamps to 10
        assert_eq!(dynamic_priority(at(1_000), 4, now), 10);
    }

    #[test]
    fn test_urgency_bounds() {
        let now = Utc::now();
        assert_eq!(urgency(None, now), 0.0);
        assert_eq!(urgency(Some(now - chrono::Duration::seconds(5)), now), 1.0);
        assert_eq!(urgency(Some(now + chrono::Duration::seconds(60)), now), 0.0);
        let mid = urgency(Some(now + chrono::Duration::seconds(15)), now);
        assert!((mid - 0.5).abs() < 1e-3);
    }
}
