//! Task domain types.
//!
//! Mirrors the JSON document shape in the store's external interface: a
//! `Task` is the unit of work the scheduler dispatches, `Event` is its
//! append-only audit trail, and `Priority`/`TaskStatus` are the closed
//! vocabularies the state machine is built from.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling priority. Default is `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Rank used for bucket ordering: high first, then medium, then low.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("unknown priority: {}", s)),
        }
    }
}

/// Task lifecycle status. See the state machine in the task store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Quarantined,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Quarantined => write!(f, "quarantined"),
        }
    }
}

/// Who generated an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    System,
    User,
}

/// Severity of an event, independent of its `EventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// The kind of state change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Started,
    Completed,
    Failed,
    Quarantined,
    Reset,
    Comment,
}

/// A single append-only entry in a task's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub level: EventLevel,
    pub actor: Actor,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The subset of lifecycle timestamps a task may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub quarantined_at: Option<DateTime<Utc>>,
}

/// A unit of work in the backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timestamps: Timestamps,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Task {
    /// Whether every entry in `depends_on` refers to a completed task.
    /// Non-existent dependency ids are treated as unmet.
    pub fn dependencies_met(&self, resolve: impl Fn(&str) -> Option<TaskStatus>) -> bool {
        self.depends_on.iter().all(|dep| resolve(dep) == Some(TaskStatus::Completed))
    }

    /// Whether `scheduled_for`, if set, has passed.
    pub fn is_scheduled_now(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_none_or(|when| when <= now)
    }

    pub fn push_event(&mut self, event_type: EventType, level: EventLevel, actor: Actor, message: impl Into<String>) {
        self.events.push(Event {
            task_id: self.id.clone(),
            timestamp: Utc::now(),
            event_type,
            level,
            actor,
            message: message.into(),
            metadata: HashMap::new(),
        });
    }
}

/// Fields accepted by `createTask`/`createSubTask`. Anything not set falls
/// back to the Task's own defaults (status `pending`, priority `medium`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub feature: Option<String>,
    pub depends_on: Vec<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Selection criteria shared by `findNextTask`/`listTasks`/`listPendingTasks`/`countPending`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub feature: Option<String>,
    pub priority: Option<Priority>,
    pub parent_id: Option<String>,
    pub top_level_only: bool,
}

impl Filter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(feature) = &self.feature
            && task.feature.as_deref() != Some(feature.as_str())
        {
            return false;
        }
        if let Some(priority) = self.priority
            && task.priority != priority
        {
            return false;
        }
        if let Some(parent_id) = &self.parent_id
            && task.parent_id.as_deref() != Some(parent_id.as_str())
        {
            return false;
        }
        if self.top_level_only && task.parent_id.is_some() {
            return false;
        }
        true
    }
}

/// Stable ordering rule: priority bucket (high, medium, low), then ascending id.
pub fn ordering_key(task: &Task) -> (u8, &str) {
    (task.priority.rank(), task.id.as_str())
}
