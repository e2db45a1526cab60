use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type")]
pub enum Event {
    /// A specification was accepted and queued
    #[serde(rename = "task.submitted")]
    TaskSubmitted { task_id: String, feature_name: String },

    #[serde(rename = "task.status_changed")]
    TaskStatusChanged {
        task_id: String,
        from_status: String,
        to_status: String,
    },

    #[serde(rename = "scenario.finished")]
    ScenarioFinished {
        task_id: String,
        scenario_id: String,
        status: String,
    },

    #[serde(rename = "step.finished")]
    StepFinished {
        task_id: String,
        scenario_id: String,
        step: String,
        status: String,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Task the event belongs to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskStatusChanged { task_id, .. }
            | Self::ScenarioFinished { task_id, .. }
            | Self::StepFinished { task_id, .. } => Some(task_id),
            Self::Error { .. } => None,
        }
    }

    /// Wire name, as used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task.submitted",
            Self::TaskStatusChanged { .. } => "task.status_changed",
            Self::ScenarioFinished { .. } => "scenario.finished",
            Self::StepFinished { .. } => "step.finished",
            Self::Error { .. } => "error",
        }
    }
}
