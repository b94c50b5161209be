use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Named counters accumulated over the lifetime of a job.
///
/// Counters are grouped (`group -> name -> value`) and only ever merged
/// additively: each completed task reports its own counters and the tracker
/// folds them into the job record, so the totals at completion are the sum
/// over all completed tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    groups: HashMap<String, HashMap<String, i64>>,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    /// Add `delta` to the counter, creating it at zero if absent.
    pub fn increment(&mut self, group: impl Into<String>, name: impl Into<String>, delta: i64) {
        *self
            .groups
            .entry(group.into())
            .or_default()
            .entry(name.into())
            .or_default() += delta;
    }

    /// Current value of a counter; absent counters read as zero.
    pub fn get(&self, group: &str, name: &str) -> i64 {
        self.groups
            .get(group)
            .and_then(|names| names.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &Counters) {
        for (group, names) in &other.groups {
            let target = self.groups.entry(group.clone()).or_default();
            for (name, value) in names {
                *target.entry(name.clone()).or_default() += value;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
