use chrono::{DateTime, Utc};
use orpar_core::{OrparError, OrparPhase, PartialProfile};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Applicability window of an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    /// Applied to exactly one resolution, then consumed.
    NextCall,
    /// Every phase until the agent disconnects.
    Session,
    /// Every phase of one task until it completes.
    Task,
    /// One phase until that phase completes.
    CurrentPhase,
}

impl OverrideScope {
    /// Rank used when several overrides match one resolution. Higher wins.
    ///
    /// `current_phase > task > next_call > session`: the narrowest,
    /// shortest-lived scope takes effect.
    pub fn precedence(&self) -> u8 {
        match self {
            OverrideScope::CurrentPhase => 3,
            OverrideScope::Task => 2,
            OverrideScope::NextCall => 1,
            OverrideScope::Session => 0,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideScope::NextCall => "next_call",
            OverrideScope::Session => "session",
            OverrideScope::Task => "task",
            OverrideScope::CurrentPhase => "current_phase",
        }
    }
}

impl fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideScope {
    type Err = OrparError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "next_call" => Ok(OverrideScope::NextCall),
            "session" => Ok(OverrideScope::Session),
            "task" => Ok(OverrideScope::Task),
            "current_phase" => Ok(OverrideScope::CurrentPhase),
            other => Err(OrparError::Validation(format!(
                "unknown override scope '{other}'"
            ))),
        }
    }
}

/// One granted override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverrideState {
    /// Unique override id.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: String,
    /// Owning channel.
    pub channel_id: String,
    /// Task a `task` override is bound to.
    pub task_id: Option<String>,
    /// Phase the override was requested in.
    pub phase: OrparPhase,
    /// Applicability window.
    pub scope: OverrideScope,
    /// Fields this override sets.
    pub params: PartialProfile,
    /// Agent-supplied justification.
    pub reason: String,
    /// When the override was granted.
    pub created_at: DateTime<Utc>,
    /// Past this instant the override is inert.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set once a `next_call` override has been applied.
    pub consumed: bool,
}

impl ParameterOverrideState {
    /// True once `now` is past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    /// Inert overrides are expired or consumed and must never be applied.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && !self.is_expired_at(now)
    }

    /// Whether this override applies to a resolution for `phase` / `task_id`.
    ///
    /// Agent and channel are matched by the store.
    pub fn applies_to(&self, phase: OrparPhase, task_id: Option<&str>) -> bool {
        match self.scope {
            OverrideScope::NextCall | OverrideScope::Session => true,
            OverrideScope::Task => {
                task_id.is_some() && self.task_id.as_deref() == task_id
            }
            OverrideScope::CurrentPhase => self.phase == phase,
        }
    }

    fn belongs_to(&self, agent_id: &str, channel_id: &str) -> bool {
        self.agent_id == agent_id && self.channel_id == channel_id
    }
}

/// Counts of overrides removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverrideSweep {
    /// Removed because their TTL passed.
    pub expired: usize,
    /// Removed because they were already applied.
    pub consumed: usize,
}

/// In-memory registry of granted overrides.
///
/// Every read-modify-write happens under one lock, so lookup-then-consume and
/// lookup-then-delete are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct OverrideStore {
    entries: Mutex<HashMap<Uuid, ParameterOverrideState>>,
}

impl OverrideStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `state` and returns its id.
    pub fn insert(&self, state: ParameterOverrideState) -> Uuid {
        let id = state.id;
        self.entries.lock().insert(id, state);
        id
    }

    /// Looks up one override by id, active or not.
    pub fn get(&self, id: Uuid) -> Option<ParameterOverrideState> {
        self.entries.lock().get(&id).cloned()
    }

    /// Finds the single best active override for a resolution.
    ///
    /// Candidates are ranked by [`OverrideScope::precedence`], then by
    /// creation time (newest first). When `consume` is set and the winner is
    /// a `next_call` override, it is marked consumed before the lock is
    /// released, so it can never be applied twice.
    pub fn best_match(
        &self,
        agent_id: &str,
        channel_id: &str,
        phase: OrparPhase,
        task_id: Option<&str>,
        now: DateTime<Utc>,
        consume: bool,
    ) -> Option<ParameterOverrideState> {
        let mut entries = self.entries.lock();
        let winner_id = entries
            .values()
            .filter(|o| o.belongs_to(agent_id, channel_id))
            .filter(|o| o.is_active_at(now) && o.applies_to(phase, task_id))
            .max_by(|a, b| {
                a.scope
                    .precedence()
                    .cmp(&b.scope.precedence())
                    .then_with(|| a.created_at.cmp(&b.created_at))
            })
            .map(|o| o.id)?;

        let winner = entries.get_mut(&winner_id)?;
        let applied = winner.clone();
        if consume && winner.scope == OverrideScope::NextCall {
            winner.consumed = true;
        }
        Some(applied)
    }

    /// Removes every override matching `predicate`. Returns how many were removed.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ParameterOverrideState) -> bool,
    {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, o| !predicate(o));
        before - entries.len()
    }

    /// Drops expired overrides and consumed `next_call` overrides.
    pub fn sweep(&self, now: DateTime<Utc>) -> OverrideSweep {
        let mut report = OverrideSweep::default();
        self.entries.lock().retain(|_, o| {
            if o.is_expired_at(now) {
                report.expired += 1;
                false
            } else if o.consumed {
                report.consumed += 1;
                false
            } else {
                true
            }
        });
        report
    }

    /// Active overrides for one agent/channel pair, oldest first.
    pub fn list_active(
        &self,
        agent_id: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<ParameterOverrideState> {
        let mut active: Vec<ParameterOverrideState> = self
            .entries
            .lock()
            .values()
            .filter(|o| o.belongs_to(agent_id, channel_id) && o.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by_key(|o| o.created_at);
        active
    }

    /// Number of active overrides across every agent and channel.
    pub fn count_active(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|o| o.is_active_at(now))
            .count()
    }

    /// Number of stored overrides, including inert ones.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every override.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
