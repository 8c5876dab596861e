//! Structured tool outcomes: input validation, output normalization,
//! failure classification, and duplicate/disabled/cancelled handling.
//!
//! Everything here is pure construction — no tool is ever invoked from this
//! module. Validation failures are caught before dispatch and never reach
//! tool execution.

use std::collections::HashMap;

use serde_json::Value;

use crate::traits::{ToolCall, ToolResult};

/// Required input fields for creation tools, checked before dispatch.
const REQUIRED_FIELDS: &[(&str, &[&str])] = &[
    ("create_document", &["filename", "format", "content"]),
    ("write_file", &["path", "content"]),
    ("create_spreadsheet", &["filename", "sheets"]),
    ("create_presentation", &["filename", "slides"]),
];

/// Tools whose raw output gets a termination banner prepended.
const COMMAND_TOOLS: &[&str] = &["terminal", "execute_command", "run_script"];

/// Message fragments that mark a failure as terminal for the tool this
/// attempt.
const HARD_FAILURE_PATTERNS: &[&str] = &[
    "not currently executable",
    "blocked by",
    "disabled",
    "not available",
    "not configured",
];

fn field_is_missing(input: &Value, field: &str) -> bool {
    match input.get(field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

/// Validate required fields for creation tools. Returns an immediate error
/// result with a corrective suggestion when fields are missing; `None` means
/// the call may proceed to execution.
pub fn validate_tool_input(call: &ToolCall) -> Option<ToolResult> {
    let required = REQUIRED_FIELDS
        .iter()
        .find(|(name, _)| *name == call.name)
        .map(|(_, fields)| *fields)?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|f| field_is_missing(&call.input, f))
        .collect();
    if missing.is_empty() {
        return None;
    }

    Some(ToolResult::error(
        call,
        format!(
            "Invalid input for '{}': missing required field(s): {}. Suggestion: call '{}' again \
             with every required field populated ({}).",
            call.name,
            missing.join(", "),
            call.name,
            required.join(", "),
        ),
    ))
}

/// How a command-execution tool terminated, when it did not finish normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTermination {
    UserStop,
    Timeout,
    SpawnError,
}

fn termination_banner(termination: CommandTermination) -> &'static str {
    match termination {
        CommandTermination::UserStop => {
            "[COMMAND STOPPED] The user stopped this command. Do not re-run it; continue with \
             the output captured so far."
        }
        CommandTermination::Timeout => {
            "[COMMAND TIMED OUT] The command exceeded its time limit. Use a narrower command or \
             run the long step in the background."
        }
        CommandTermination::SpawnError => {
            "[COMMAND FAILED TO START] The command could not be spawned. Check that the \
             executable exists and retry with a corrected command line."
        }
    }
}

/// Truncate and sanitize raw tool output. Command tools get a contextual
/// banner distinguishing user stop, timeout, and spawn error.
pub fn normalize_tool_output(
    tool: &str,
    raw: &str,
    termination: Option<CommandTermination>,
    max_chars: usize,
) -> String {
    let mut body: String = raw
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    if body.chars().count() > max_chars {
        body = body.chars().take(max_chars).collect();
        body.push_str("\n[output truncated]");
    }

    if COMMAND_TOOLS.contains(&tool) {
        if let Some(termination) = termination {
            return format!("{}\n\n{}", termination_banner(termination), body);
        }
    }
    body
}

/// Structured flags a tool implementation can attach to a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureSignals {
    pub disabled: bool,
    pub unavailable: bool,
    pub blocked: bool,
    pub missing_requirement: bool,
}

/// Two-tier failure classification. Soft failures are retried or reported
/// normally; hard failures are terminal for the tool within the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSeverity {
    Soft,
    Hard,
}

pub fn classify_failure(signals: &FailureSignals, message: &str) -> FailureSeverity {
    if signals.disabled || signals.unavailable || signals.blocked || signals.missing_requirement {
        return FailureSeverity::Hard;
    }
    let lowered = message.to_ascii_lowercase();
    if HARD_FAILURE_PATTERNS.iter().any(|p| lowered.contains(p)) {
        return FailureSeverity::Hard;
    }
    FailureSeverity::Soft
}

/// Failure category of one resolved tool call within a turn. Feeds the
/// all-failed-turn decision and the persistent failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailureKind {
    Soft,
    Hard,
    Disabled,
    Unavailable,
    Duplicate,
}

/// Per-tool consecutive-failure counts, reset between attempt phases.
/// Mutated only by the failure-recording path.
#[derive(Debug, Default)]
pub struct PersistentToolFailures {
    counts: HashMap<String, u32>,
}

impl PersistentToolFailures {
    pub fn record_failure(&mut self, tool: &str) -> u32 {
        let count = self.counts.entry(tool.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// A success resets the consecutive streak for that tool.
    pub fn record_success(&mut self, tool: &str) {
        self.counts.remove(tool);
    }

    pub fn count(&self, tool: &str) -> u32 {
        self.counts.get(tool).copied().unwrap_or(0)
    }

    /// Highest streak across tools, with the owning tool name.
    pub fn worst(&self) -> Option<(&str, u32)> {
        self.counts
            .iter()
            .max_by_key(|(_, c)| **c)
            .map(|(t, c)| (t.as_str(), *c))
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

/// Resolve a duplicate tool call. An idempotent tool with a cached result
/// replays it as a success without re-execution; anything else becomes a
/// structured duplicate error with a suggestion.
pub fn resolve_duplicate(
    call: &ToolCall,
    cached: Option<String>,
    idempotent: bool,
) -> (ToolResult, Option<ToolFailureKind>) {
    if idempotent {
        if let Some(cached) = cached {
            return (ToolResult::ok(call, cached), None);
        }
    }
    (
        ToolResult::error(
            call,
            format!(
                "Duplicate call: '{}' was already invoked with identical input in this attempt. \
                 Suggestion: reuse the earlier result, or change the input if you need something \
                 different.",
                call.name
            ),
        ),
        Some(ToolFailureKind::Duplicate),
    )
}

/// Resolve a redundant file operation (same target already produced this
/// attempt): cached result when replay is safe, otherwise blocked with a
/// suggestion.
pub fn resolve_redundant_file_op(
    call: &ToolCall,
    target: &str,
    cached: Option<String>,
    replay_safe: bool,
) -> (ToolResult, Option<ToolFailureKind>) {
    if replay_safe {
        if let Some(cached) = cached {
            return (ToolResult::ok(call, cached), None);
        }
    }
    (
        ToolResult::error(
            call,
            format!(
                "Redundant file operation: '{}' already produced '{}' in this attempt. \
                 Suggestion: move on to the next step, or pick a different target path.",
                call.name, target
            ),
        ),
        Some(ToolFailureKind::Duplicate),
    )
}

pub fn disabled_tool_result(call: &ToolCall) -> (ToolResult, Option<ToolFailureKind>) {
    (
        ToolResult::error(
            call,
            format!(
                "Tool '{}' is disabled for this task and will not run. Use a different tool or \
                 report the limitation.",
                call.name
            ),
        ),
        Some(ToolFailureKind::Disabled),
    )
}

pub fn unavailable_tool_result(call: &ToolCall) -> (ToolResult, Option<ToolFailureKind>) {
    (
        ToolResult::error(
            call,
            format!(
                "Tool '{}' is not available in this environment. Use a different tool or report \
                 the limitation.",
                call.name
            ),
        ),
        Some(ToolFailureKind::Unavailable),
    )
}

/// Cancellation result, distinguishing a call cancelled before execution
/// from one that had already completed when cancellation arrived.
pub fn cancelled_result(call: &ToolCall, already_completed: bool) -> ToolResult {
    if already_completed {
        ToolResult::error(call, "Tool call already completed before cancellation.")
    } else {
        ToolResult::error(call, "Tool call cancelled before execution.")
    }
}
