use chrono::{DateTime, Utc};
use orpar_core::OrparPhase;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Outcome of one completed model call, reported by the calling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetric {
    /// Agent that made the call.
    pub agent_id: String,
    /// Channel the call was made in.
    pub channel_id: String,
    /// Task the call belonged to, if any.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Phase the call was made in.
    pub phase: OrparPhase,
    /// Model that served the call.
    pub model: String,
    /// Prompt tokens billed.
    pub input_tokens: u64,
    /// Generated tokens billed.
    pub output_tokens: u64,
    /// Thinking tokens billed.
    #[serde(default)]
    pub reasoning_tokens: u64,
    /// Wall-clock latency.
    pub latency_ms: u64,
    /// Whether the call returned a usable response.
    pub success: bool,
    /// Billed cost in USD.
    pub actual_cost: f64,
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
}

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetricFilter {
    /// Only this agent.
    pub agent_id: Option<String>,
    /// Only this channel.
    pub channel_id: Option<String>,
    /// Only this task.
    pub task_id: Option<String>,
    /// Only this phase.
    pub phase: Option<OrparPhase>,
    /// Only this model.
    pub model: Option<String>,
    /// Only successful, or only failed, calls.
    pub success: Option<bool>,
    /// Only calls completed at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

impl UsageMetricFilter {
    /// True when `metric` passes every set field.
    pub fn matches(&self, metric: &UsageMetric) -> bool {
        self.agent_id.as_ref().map_or(true, |a| *a == metric.agent_id)
            && self.channel_id.as_ref().map_or(true, |c| *c == metric.channel_id)
            && self
                .task_id
                .as_ref()
                .map_or(true, |t| metric.task_id.as_ref() == Some(t))
            && self.phase.map_or(true, |p| p == metric.phase)
            && self.model.as_ref().map_or(true, |m| *m == metric.model)
            && self.success.map_or(true, |s| s == metric.success)
            && self.since.map_or(true, |since| metric.timestamp >= since)
    }
}

/// Aggregate over the retained usage history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Number of retained calls.
    pub total_calls: usize,
    /// Calls that succeeded.
    pub successful_calls: usize,
    /// Input, output, and reasoning tokens combined.
    pub total_tokens: u64,
    /// Sum of actual costs in USD.
    pub total_cost: f64,
    /// Mean latency; zero when empty.
    pub average_latency_ms: f64,
}

/// Bounded history of usage metrics; the oldest entry is dropped first.
#[derive(Debug)]
pub struct UsageLedger {
    limit: usize,
    entries: Mutex<VecDeque<UsageMetric>>,
}

impl UsageLedger {
    /// Creates a ledger retaining at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a metric, evicting the oldest when full.
    pub fn record(&self, metric: UsageMetric) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    /// Matching metrics, oldest first.
    pub fn query(&self, filter: &UsageMetricFilter) -> Vec<UsageMetric> {
        self.entries
            .lock()
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    /// Aggregates the retained history.
    pub fn summary(&self) -> UsageSummary {
        let entries = self.entries.lock();
        let mut summary = UsageSummary {
            total_calls: entries.len(),
            ..Default::default()
        };
        let mut latency_total = 0u64;
        for metric in entries.iter() {
            if metric.success {
                summary.successful_calls += 1;
            }
            summary.total_tokens +=
                metric.input_tokens + metric.output_tokens + metric.reasoning_tokens;
            summary.total_cost += metric.actual_cost;
            latency_total += metric.latency_ms;
        }
        if !entries.is_empty() {
            summary.average_latency_ms = latency_total as f64 / entries.len() as f64;
        }
        summary
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops the whole history.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn metric(agent: &str, phase: OrparPhase, success: bool) -> UsageMetric {
        UsageMetric {
            agent_id: agent.into(),
            channel_id: "c".into(),
            task_id: None,
            phase,
            model: "gpt-4o".into(),
            input_tokens: 100,
            output_tokens: 50,
            reasoning_tokens: 0,
            latency_ms: 200,
            success,
            actual_cost: 0.01,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let ledger = UsageLedger::new(3);
        for i in 0..5 {
            ledger.record(metric(&format!("a{i}"), OrparPhase::Action, true));
        }
        let all = ledger.query(&UsageMetricFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].agent_id, "a2");
        assert_eq!(all[2].agent_id, "a4");
    }

    #[test]
    fn test_filter_combines_fields() {
        let ledger = UsageLedger::new(10);
        ledger.record(metric("a", OrparPhase::Action, true));
        ledger.record(metric("a", OrparPhase::Planning, false));
        ledger.record(metric("b", OrparPhase::Action, true));

        let filter = UsageMetricFilter {
            agent_id: Some("a".into()),
            phase: Some(OrparPhase::Action),
            ..Default::default()
        };
        assert_eq!(ledger.query(&filter).len(), 1);

        let failures = UsageMetricFilter {
            success: Some(false),
            ..Default::default()
        };
        assert_eq!(ledger.query(&failures).len(), 1);
    }

    #[test]
    fn test_summary() {
        let ledger = UsageLedger::new(10);
        assert_eq!(ledger.summary(), UsageSummary::default());
        ledger.record(metric("a", OrparPhase::Action, true));
        ledger.record(metric("a", OrparPhase::Action, false));
        let summary = ledger.summary();
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.successful_calls, 1);
        assert_eq!(summary.total_tokens, 300);
        assert!((summary.total_cost - 0.02).abs() < 1e-12);
        assert!((summary.average_latency_ms - 200.0).abs() < 1e-9);
    }
}
