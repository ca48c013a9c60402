use chrono::{DateTime, Duration, Utc};
use orpar_core::OrparPhase;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Stands in for the task component of a key when no task is set.
const NO_TASK: &str = "no-task";

/// Identity of one request tracker: `agent:channel:task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TrackerKey {
    /// Agent component.
    pub agent_id: String,
    /// Channel component.
    pub channel_id: String,
    /// Task component; `None` for requests outside a task.
    pub task_id: Option<String>,
}

impl TrackerKey {
    /// Builds a key from borrowed ids.
    pub fn new(agent_id: &str, channel_id: &str, task_id: Option<&str>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            channel_id: channel_id.to_string(),
            task_id: task_id.map(String::from),
        }
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.agent_id,
            self.channel_id,
            self.task_id.as_deref().unwrap_or(NO_TASK)
        )
    }
}

/// Admission counters for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestTracker {
    /// Admitted requests per phase.
    pub phase_requests: HashMap<OrparPhase, u32>,
    /// Admitted requests across all phases.
    pub total_requests: u32,
    /// Running sum of admitted cost deltas.
    pub total_cost: f64,
    /// When the last request was admitted.
    pub last_request_time: DateTime<Utc>,
}

impl RequestTracker {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            phase_requests: HashMap::new(),
            total_requests: 0,
            total_cost: 0.0,
            last_request_time: now,
        }
    }

    /// Requests admitted in `phase` so far.
    pub fn requests_in(&self, phase: OrparPhase) -> u32 {
        self.phase_requests.get(&phase).copied().unwrap_or(0)
    }

    fn record(&mut self, charge: &Charge) {
        *self.phase_requests.entry(charge.phase).or_insert(0) += 1;
        self.total_requests += 1;
        self.total_cost += charge.cost_delta;
        self.last_request_time = charge.at;
    }
}

/// One admitted request to be recorded against a tracker.
#[derive(Debug, Clone, Copy)]
pub struct Charge {
    /// Phase the request was made in.
    pub phase: OrparPhase,
    /// Cost delta to add to the running total.
    pub cost_delta: f64,
    /// Admission time.
    pub at: DateTime<Utc>,
}

/// Request trackers keyed by agent, channel, and task.
#[derive(Debug, Default)]
pub struct RequestTrackerStore {
    trackers: Mutex<HashMap<TrackerKey, RequestTracker>>,
}

impl RequestTrackerStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a check-then-record sequence atomically for `key`.
    ///
    /// `decide` sees the current tracker (a zeroed one if none exists yet)
    /// and returns its verdict plus an optional charge. The charge is applied
    /// before the lock is released, so concurrent admissions cannot both pass
    /// a limit that only one of them fits under. Trackers are created only
    /// when a charge is recorded.
    pub fn transact<R, F>(&self, key: &TrackerKey, now: DateTime<Utc>, decide: F) -> R
    where
        F: FnOnce(&RequestTracker) -> (R, Option<Charge>),
    {
        let mut trackers = self.trackers.lock();
        let (verdict, charge) = match trackers.get(key) {
            Some(tracker) => decide(tracker),
            None => decide(&RequestTracker::fresh(now)),
        };
        if let Some(charge) = charge {
            trackers
                .entry(key.clone())
                .or_insert_with(|| RequestTracker::fresh(now))
                .record(&charge);
        }
        verdict
    }

    /// Snapshot of the tracker for `key`.
    pub fn get(&self, key: &TrackerKey) -> Option<RequestTracker> {
        self.trackers.lock().get(key).cloned()
    }

    /// Drops every tracker belonging to `task_id`, across agents and channels.
    pub fn remove_task(&self, task_id: &str) -> usize {
        let mut trackers = self.trackers.lock();
        let before = trackers.len();
        trackers.retain(|key, _| key.task_id.as_deref() != Some(task_id));
        before - trackers.len()
    }

    /// Drops trackers with no request for longer than `max_idle`.
    pub fn sweep_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let mut trackers = self.trackers.lock();
        let before = trackers.len();
        trackers.retain(|_, t| now - t.last_request_time <= max_idle);
        before - trackers.len()
    }

    /// Number of trackers.
    pub fn len(&self) -> usize {
        self.trackers.lock().len()
    }

    /// True when there are no trackers.
    pub fn is_empty(&self) -> bool {
        self.trackers.lock().is_empty()
    }

    /// Removes every tracker.
    pub fn clear(&self) {
        self.trackers.lock().clear();
    }
}
