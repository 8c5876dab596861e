//! Structured events emitted by the task executor.
//!
//! Each event type has a corresponding payload struct. Events are the
//! executor's only outward observability surface: hosts persist, display, or
//! forward them as they see fit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single immutable executor event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorEvent {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: ExecutorEventData,
}

impl ExecutorEvent {
    pub fn new(task_id: impl Into<String>, data: ExecutorEventData) -> Self {
        Self {
            task_id: task_id.into(),
            created_at: Utc::now(),
            data,
        }
    }
}

/// Typed payloads for each event the executor can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutorEventData {
    /// A non-blank assistant text segment was produced.
    AssistantMessage(AssistantMessageData),
    /// A max-tokens recovery attempt is in progress.
    MaxTokensRecovery(MaxTokensRecoveryData),
    /// A one-time recovery hint was queued after an all-failed tool turn.
    ToolRecoveryPrompted(ToolRecoveryPromptedData),
    /// A tool crossed its persistent-failure threshold with varied inputs.
    VariedFailure(VariedFailureData),
    /// A workspace-switching tool completed successfully.
    WorkspaceSwitch(WorkspaceSwitchData),
}

/// Data for AssistantMessage events. `extra` carries the caller-supplied
/// payload merged in by the output processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessageData {
    pub content: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub extra: JsonValue,
}

/// Data for MaxTokensRecovery events: current/maximum attempt counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaxTokensRecoveryData {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Data for ToolRecoveryPrompted events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolRecoveryPromptedData {
    pub iteration: usize,
}

/// Data for VariedFailure events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariedFailureData {
    pub tool: String,
    pub consecutive_failures: u32,
}

/// Data for WorkspaceSwitch events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSwitchData {
    pub workspace: String,
}
