use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::events::ExecutorEvent;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One block inside a message. A single assistant turn may carry text and
/// several parallel tool-use blocks; results are matched back by id, never
/// by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A message in the conversation history. History is append-only: the loop
/// never rewrites earlier turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// All text block contents, joined with newlines.
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Tool-use blocks of this message, as owned calls.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Approximate character weight of this message, used for budgeting.
    pub fn char_len(&self) -> usize {
        self.content
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content.len(),
            })
            .sum()
    }
}

/// A single tool call produced by the model. Owned by the current turn until
/// it resolves into a `ToolResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The resolved outcome of one tool call. Exactly one result per call;
/// leaving a call unresolved is a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            content: content.into(),
            is_error: true,
        }
    }

    pub fn into_block(self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_use_id,
            content: self.content,
            is_error: self.is_error,
        }
    }
}

/// Model-reported terminal condition for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    #[serde(other)]
    Other,
}

/// Token usage statistics from one model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
}

/// One model turn: stop reason, ordered content blocks, usage.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub stop_reason: StopReason,
    pub content: Vec<ContentBlock>,
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    /// All text block contents, joined with newlines.
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// Everything one model call needs. The executor computes `max_tokens` and
/// `timeout`; the client owns transport and retry/backoff.
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [Value],
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Model transport with retries. Transport errors are opaque to the loop
/// beyond attempt accounting; the client applies its own backoff policy.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call_with_retry(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelResponse>;
}

/// Receives usage metrics after each successful model call.
pub trait UsageTracker: Send + Sync {
    fn record_usage(&self, usage: &TokenUsage);
}

/// Re-drafts finished text through quality-improvement passes.
#[async_trait]
pub trait DraftRefiner: Send + Sync {
    async fn refine(&self, draft: &str, passes: u8) -> anyhow::Result<String>;
}

/// Executes one tool call and exposes the file-creation side channel.
/// Tool dispatch, sandboxing, and process management live behind this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run_tool(&self, call: &ToolCall) -> anyhow::Result<String>;

    /// Paths of files created so far in this attempt. Used by completion
    /// adjudication; hosts without a workspace return an empty list.
    async fn created_files(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Outcome of the idempotency/duplicate check for one (tool, input) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateCheck {
    /// First time this exact call is seen in the attempt.
    Fresh,
    /// Seen before. `cached` holds the earlier result when available;
    /// `idempotent` says whether replaying that result is safe.
    Duplicate {
        cached: Option<String>,
        idempotent: bool,
    },
}

/// Duplicate/idempotency service keyed by tool name + structured input.
#[async_trait]
pub trait DuplicateChecker: Send + Sync {
    async fn check(&self, tool: &str, input: &Value) -> DuplicateCheck;

    /// Record a completed call so later duplicates can reuse its result.
    async fn record(&self, tool: &str, input: &Value, result: &str);
}

/// Verdict from the output-compliance check on one assistant text segment.
#[derive(Debug, Clone, Default)]
pub struct ComplianceVerdict {
    pub flagged: bool,
    pub reason: Option<String>,
}

/// Checks assistant output for suspicious content and handles flagged
/// segments (alerting, quarantine — host concerns).
pub trait ComplianceChecker: Send + Sync {
    fn check_output(&self, text: &str) -> ComplianceVerdict;

    fn handle_suspicious(&self, text: &str, verdict: &ComplianceVerdict) {
        let _ = (text, verdict);
    }
}

/// Fire-and-forget sink for structured executor events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutorEvent);
}

/// Status of one plan step, as reported by the host's planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One step of the host-provided plan. Only description and status matter to
/// completion adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub status: PlanStepStatus,
}

/// Task domain. Drives the tool domain gate, the domain completion
/// guardrail, and loop-guardrail threshold selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDomain {
    Auto,
    Code,
    Operations,
    Research,
    Writing,
    General,
    Other(String),
}

impl TaskDomain {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "code" => Self::Code,
            "operations" => Self::Operations,
            "research" => Self::Research,
            "writing" => Self::Writing,
            "general" => Self::General,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Code => "code",
            Self::Operations => "operations",
            Self::Research => "research",
            Self::Writing => "writing",
            Self::General => "general",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for TaskDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much the model is allowed to do this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// No restriction.
    Execute,
    /// Draft actions only; mutating tools are denied.
    Propose,
    /// Read-only by design; mutating tools are denied.
    Analyze,
}
