//! Degenerate-loop detection and one-shot corrective interventions.
//!
//! Two independent latched nudges per attempt: a loop break when the same
//! (tool, target) pair repeats, and a varied-failure nudge when one tool
//! keeps failing with different inputs. A separate all-failed-turn decision
//! can end the attempt outright. Latches are plain fields with a single
//! owner — the attempt runs on one logical task, so no locking is needed.

use std::collections::VecDeque;

use tracing::warn;

use crate::config::LoopGuardrailConfig;
use crate::executor::normalize::{PersistentToolFailures, ToolFailureKind};
use crate::traits::Message;

/// Tools whose output can fall back to plain text in the response.
const FILE_WRITING_TOOLS: &[&str] = &[
    "write_file",
    "create_document",
    "create_spreadsheet",
    "create_presentation",
];

pub(crate) fn is_file_writing_tool(name: &str) -> bool {
    FILE_WRITING_TOOLS.contains(&name)
}

/// Bounded ordered window of (tool, target) pairs for loop detection.
#[derive(Debug)]
pub struct RecentToolCalls {
    window: VecDeque<(String, String)>,
    cap: usize,
}

impl RecentToolCalls {
    pub fn new(cap: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, tool: &str, target: &str) {
        if self.window.len() == self.cap {
            self.window.pop_front();
        }
        self.window.push_back((tool.to_string(), target.to_string()));
    }

    fn count(&self, tool: &str, target: &str) -> usize {
        self.window
            .iter()
            .filter(|(t, g)| t == tool && g == target)
            .count()
    }

    /// The pair with the most occurrences in the window, if any.
    fn hottest(&self) -> Option<(&str, &str, usize)> {
        self.window
            .iter()
            .map(|(t, g)| (t.as_str(), g.as_str(), self.count(t, g)))
            .max_by_key(|(_, _, n)| *n)
    }
}

/// A varied-failure nudge that was just injected, for event emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariedFailureNudge {
    pub tool: String,
    pub consecutive_failures: u32,
}

/// Stop/hint decision after a turn in which every tool result was an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllFailedDecision {
    pub stop: bool,
    pub inject_recovery_hint: bool,
}

#[derive(Debug)]
pub struct LoopGuard {
    recent: RecentToolCalls,
    config: LoopGuardrailConfig,
    loop_break_injected: bool,
    varied_failure_nudge_injected: bool,
    tool_recovery_hint_injected: bool,
}

impl LoopGuard {
    pub fn new(config: LoopGuardrailConfig, window_cap: usize) -> Self {
        Self {
            recent: RecentToolCalls::new(window_cap),
            config,
            loop_break_injected: false,
            varied_failure_nudge_injected: false,
            tool_recovery_hint_injected: false,
        }
    }

    /// Reset window and latches for a new attempt phase (step or follow-up).
    pub fn reset_for_phase(&mut self) {
        self.recent = RecentToolCalls::new(self.recent.cap);
        self.loop_break_injected = false;
        self.varied_failure_nudge_injected = false;
        self.tool_recovery_hint_injected = false;
    }

    pub fn record_call(&mut self, tool: &str, target: &str) {
        self.recent.push(tool, target);
    }

    /// Inject the repeated-call loop break when a (tool, target) pair reaches
    /// the same-target minimum in the recent window. Fires at most once per
    /// attempt; returns whether a message was injected.
    pub fn maybe_inject_tool_loop_break(&mut self, history: &mut Vec<Message>) -> bool {
        if self.loop_break_injected {
            return false;
        }
        let Some((tool, target, count)) = self.recent.hottest() else {
            return false;
        };
        if count < self.config.same_target_min_calls {
            return false;
        }
        let (tool, target) = (tool.to_string(), target.to_string());
        warn!(%tool, %target, count, "Repeated identical tool calls detected; injecting loop break");
        history.push(Message::user_text(format!(
            "You have called '{tool}' on '{target}' {count} times without new results. Stop \
             using that tool now: either answer with the findings you already have, or take a \
             fundamentally different approach."
        )));
        self.loop_break_injected = true;
        true
    }

    /// Inject the varied-failure nudge when any tool's persistent failure
    /// streak reaches the domain-tuned threshold, even with varying inputs.
    /// Fires at most once per attempt, independent of the loop-break latch.
    pub fn maybe_inject_varied_failure_nudge(
        &mut self,
        failures: &PersistentToolFailures,
        history: &mut Vec<Message>,
    ) -> Option<VariedFailureNudge> {
        if self.varied_failure_nudge_injected {
            return None;
        }
        let (tool, count) = failures.worst()?;
        if count < self.config.varied_failure_threshold {
            return None;
        }
        let tool = tool.to_string();

        let mut text = format!(
            "The tool '{tool}' has now failed {count} times in a row, even with varied inputs. \
             Abandon this approach: try a fundamentally different one, or report what is \
             blocking you."
        );
        if FILE_WRITING_TOOLS.contains(&tool.as_str()) {
            text.push_str(
                " If you cannot write the file, put the full deliverable as plain text in your \
                 response; it is captured automatically.",
            );
        }
        warn!(%tool, count, "Persistent varied tool failures; injecting nudge");
        history.push(Message::user_text(text));
        self.varied_failure_nudge_injected = true;
        Some(VariedFailureNudge {
            tool,
            consecutive_failures: count,
        })
    }

    /// Decide what to do after a turn in which every tool result was an
    /// error. `kinds` holds one entry per resolved call: `None` for a
    /// success, `Some(kind)` for a failure. The first such turn gets a
    /// one-time recovery hint and the loop continues so the model can act
    /// on it; the attempt ends only when the hint cannot be offered (already
    /// injected or past the iteration cap).
    pub fn evaluate_all_failed_turn(
        &mut self,
        kinds: &[Option<ToolFailureKind>],
        iteration: usize,
        max_iterations: usize,
    ) -> AllFailedDecision {
        if kinds.is_empty() || kinds.iter().any(Option::is_none) {
            return AllFailedDecision::default();
        }
        let has_terminal_kind = kinds.iter().flatten().any(|k| {
            matches!(
                k,
                ToolFailureKind::Disabled
                    | ToolFailureKind::Duplicate
                    | ToolFailureKind::Unavailable
                    | ToolFailureKind::Hard
            )
        });
        if !has_terminal_kind {
            return AllFailedDecision::default();
        }

        if iteration <= max_iterations && !self.tool_recovery_hint_injected {
            self.tool_recovery_hint_injected = true;
            return AllFailedDecision {
                stop: false,
                inject_recovery_hint: true,
            };
        }
        AllFailedDecision {
            stop: true,
            inject_recovery_hint: false,
        }
    }
}
