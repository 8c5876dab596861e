//! Assistant text post-processing: hallucinated-tool-call scrubbing,
//! question detection, compliance screening, and event emission.

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::events::{AssistantMessageData, ExecutorEvent, ExecutorEventData};
use crate::traits::{ComplianceChecker, EventSink};

/// Result of processing one assistant text segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedOutput {
    pub text: String,
    pub asked_question: bool,
    pub has_meaningful_text: bool,
}

/// Drop fenced code blocks that look like textual tool invocations the model
/// wrote instead of real tool-use blocks. Returns the cleaned text and
/// whether anything was dropped. Plain prose passes through byte-identical.
pub fn sanitize_assistant_text(text: &str) -> (String, bool) {
    if !text.contains("```") {
        return (text.to_string(), false);
    }

    let mut kept = String::with_capacity(text.len());
    let mut dropped = false;
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(close) = after_open.find("```") else {
            kept.push_str(rest);
            rest = "";
            break;
        };
        let fenced = &after_open[..close];
        if fenced.contains("tool_name") && fenced.contains("parameters") {
            dropped = true;
            kept.push_str(&rest[..open]);
        } else {
            kept.push_str(&rest[..open + 3 + close + 3]);
        }
        rest = &after_open[close + 3..];
    }
    kept.push_str(rest);

    if dropped {
        (kept.trim().to_string(), true)
    } else {
        (text.to_string(), false)
    }
}

/// Does this text end by asking the user something?
pub fn asks_question(text: &str) -> bool {
    text.trim_end().ends_with('?')
}

/// Process one assistant text segment: sanitize, screen for compliance, and
/// emit an `AssistantMessage` event when meaningful text remains. `extra` is
/// merged into the event payload untouched.
pub fn process_assistant_output(
    task_id: &str,
    raw_text: &str,
    extra: JsonValue,
    compliance: &dyn ComplianceChecker,
    events: &dyn EventSink,
) -> ProcessedOutput {
    let (text, had_tool_call_text) = sanitize_assistant_text(raw_text);
    if had_tool_call_text {
        warn!(task_id, "Dropped textual tool-call block from assistant output");
    }

    let has_meaningful_text = !text.trim().is_empty();
    if has_meaningful_text {
        let verdict = compliance.check_output(&text);
        if verdict.flagged {
            compliance.handle_suspicious(&text, &verdict);
        }
        events.emit(ExecutorEvent::new(
            task_id,
            ExecutorEventData::AssistantMessage(AssistantMessageData {
                content: text.clone(),
                extra,
            }),
        ));
    }

    ProcessedOutput {
        asked_question: asks_question(&text),
        has_meaningful_text,
        text,
    }
}
