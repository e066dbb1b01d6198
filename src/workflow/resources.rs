//! CPU, memory and IO budget shared by the in-flight nodes of a run

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Amount of each resource kind. Used both for node requirements and for
/// pool capacities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Resources {
    pub cpu: u64,
    pub memory: u64,
    pub io: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        cpu: 0,
        memory: 0,
        io: 0,
    };

    pub fn new(cpu: u64, memory: u64, io: u64) -> Self {
        Self { cpu, memory, io }
    }

    /// Default capacities for a run limited to `max_parallel` in-flight nodes
    pub fn for_parallelism(max_parallel: usize) -> Self {
        let n = max_parallel.max(1) as u64;
        Self {
            cpu: n,
            memory: 1024 * n,
            io: n,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// True when every kind of `self` fits within `other`
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu <= other.cpu && self.memory <= other.memory && self.io <= other.io
    }

    /// First kind of `self` that exceeds `capacity`, as `(kind, required, capacity)`
    pub fn first_excess(&self, capacity: &Resources) -> Option<(&'static str, u64, u64)> {
        self.kinds()
            .into_iter()
            .zip(capacity.kinds())
            .find(|((_, req), (_, cap))| req > cap)
            .map(|((kind, req), (_, cap))| (kind, req, cap))
    }

    fn kinds(&self) -> [(&'static str, u64); 3] {
        [("cpu", self.cpu), ("memory", self.memory), ("io", self.io)]
    }

    fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_sub(other.cpu),
            memory: self.memory.saturating_sub(other.memory),
            io: self.io.saturating_sub(other.io),
        }
    }

    fn saturating_add_capped(&self, other: &Resources, cap: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_add(other.cpu).min(cap.cpu),
            memory: self.memory.saturating_add(other.memory).min(cap.memory),
            io: self.io.saturating_add(other.io).min(cap.io),
        }
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: Resources,
    pub available: Resources,
}

impl PoolSnapshot {
    pub fn allocated(&self) -> Resources {
        self.capacity.saturating_sub(&self.available)
    }

    /// Mean of `requirement / available` over the three kinds.
    ///
    /// A kind with nothing available counts as fully utilized unless the
    /// requirement for it is zero.
    pub fn utilization(&self, requirement: &Resources) -> f64 {
        let ratios = requirement
            .kinds()
            .into_iter()
            .zip(self.available.kinds())
            .map(|((_, req), (_, avail))| match (req, avail) {
                (0, _) => 0.0,
                (_, 0) => 1.0,
                (r, a) => (r as f64 / a as f64).min(1.0),
            });
        ratios.sum::<f64>() / 3.0
    }
}

/// Resource budget with atomic all-or-nothing acquisition.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: Resources,
    available: Mutex<Resources>,
}

impl ResourcePool {
    pub fn new(capacity: Resources) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
        }
    }

    pub fn capacity(&self) -> Resources {
        self.capacity
    }

    /// Check-and-decrement in one critical section. Never takes a partial
    /// allocation. A zero requirement always succeeds.
    pub fn try_acquire(&self, requirement: &Resources) -> bool {
        if requirement.is_zero() {
            return true;
        }
        let mut available = self.lock();
        if !requirement.fits_within(&available) {
            return false;
        }
        *available = available.saturating_sub(requirement);
        true
    }

    /// Return a previous allocation. Never grows past capacity.
    pub fn release(&self, requirement: &Resources) {
        if requirement.is_zero() {
            return;
        }
        let mut available = self.lock();
        *available = available.saturating_add_capped(requirement, &self.capacity);
    }

    pub fn available(&self) -> Resources {
        *self.lock()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            capacity: self.capacity,
            available: self.available(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Resources> {
        // Critical sections never panic, so a poisoned lock still holds valid counts
        self.available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
