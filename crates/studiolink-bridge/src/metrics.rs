//! Rolling execution metrics.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// One completed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMetric {
    pub method: String,
    /// Completion time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodStats {
    pub count: u64,
    pub avg_duration: f64,
    pub failures: u64,
}

/// Aggregates over the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_commands: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Successes over total; 0 when there is no history.
    pub success_rate: f64,
    pub average_duration: f64,
    /// Most recent completions, oldest first.
    pub recent_commands: Vec<CommandMetric>,
    pub method_stats: BTreeMap<String, MethodStats>,
}

#[derive(Debug)]
pub(crate) struct MetricsCollector {
    history: VecDeque<CommandMetric>,
    capacity: usize,
    recent: usize,
}

impl MetricsCollector {
    pub fn new(capacity: usize, recent: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            recent,
        }
    }

    pub fn record(&mut self, metric: CommandMetric) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metric);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        let mut total_duration = 0.0;

        for metric in &self.history {
            snap.total_commands += 1;
            total_duration += metric.duration_ms;
            if metric.success {
                snap.success_count += 1;
            } else {
                snap.failure_count += 1;
            }

            let stats = snap.method_stats.entry(metric.method.clone()).or_default();
            stats.count += 1;
            stats.avg_duration += (metric.duration_ms - stats.avg_duration) / stats.count as f64;
            if !metric.success {
                stats.failures += 1;
            }
        }

        if snap.total_commands > 0 {
            let total = snap.total_commands as f64;
            snap.success_rate = snap.success_count as f64 / total;
            snap.average_duration = total_duration / total;
        }

        let skip = self.history.len().saturating_sub(self.recent);
        snap.recent_commands = self.history.iter().skip(skip).cloned().collect();
        snap
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
