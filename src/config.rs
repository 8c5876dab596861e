use serde::Deserialize;

use crate::traits::TaskDomain;

/// Tunables for one task executor instance. Hosts deserialize this from
/// their config file; every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Hard cap on loop iterations per attempt.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Max-tokens recovery attempts before the loop gives up on truncation.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_tokens_recovery_attempts: u32,
    /// Watchdog timeout for a single tool call. `None` disables the watchdog.
    #[serde(default = "default_tool_call_timeout_secs")]
    pub tool_call_timeout_secs: Option<u64>,
    /// Truncation limit for normalized tool output.
    #[serde(default = "default_max_tool_output_chars")]
    pub max_tool_output_chars: usize,
    /// Quality-improvement passes over a finished draft (2 or 3).
    /// `None` disables refinement.
    #[serde(default)]
    pub quality_passes: Option<u8>,
    /// Sliding-window size for repeated-call detection.
    #[serde(default = "default_recent_calls_window")]
    pub recent_calls_window: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens_recovery_attempts: default_max_recovery_attempts(),
            tool_call_timeout_secs: default_tool_call_timeout_secs(),
            max_tool_output_chars: default_max_tool_output_chars(),
            quality_passes: None,
            recent_calls_window: default_recent_calls_window(),
        }
    }
}

fn default_max_iterations() -> usize {
    30
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_tool_call_timeout_secs() -> Option<u64> {
    Some(300)
}
fn default_max_tool_output_chars() -> usize {
    12_000
}
fn default_recent_calls_window() -> usize {
    12
}

/// Numeric thresholds for the loop & failure detector, selected once per
/// task by domain and read-only during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LoopGuardrailConfig {
    /// Consecutive tool-use-only turns tolerated before intervention.
    pub max_tool_use_streak: usize,
    /// Turns inspected when judging whether progress has stalled.
    pub low_progress_window: usize,
    /// Identical (tool, target) calls that count as a loop.
    pub same_target_min_calls: usize,
    /// Consecutive follow-up turns before a host locks the follow-up phase.
    /// The executor itself runs a single phase; hosts that alternate step
    /// and follow-up phases read this threshold between
    /// `LoopGuard::reset_for_phase` calls.
    pub follow_up_lock_threshold: usize,
    /// Turns consisting only of skipped tool calls tolerated in a row.
    pub skipped_tool_only_turn_threshold: usize,
    /// Consecutive failures of one tool (varied inputs) before the nudge.
    pub varied_failure_threshold: u32,
}

impl LoopGuardrailConfig {
    /// Domain-tuned thresholds. Code and operations tasks legitimately run
    /// long tool chains, so they get the most lenient limits;
    /// research/writing/general tasks converge fast or not at all, so they
    /// get the strictest; everything else takes a balanced default.
    pub fn for_domain(domain: &TaskDomain) -> Self {
        match domain {
            TaskDomain::Code | TaskDomain::Operations => Self {
                max_tool_use_streak: 16,
                low_progress_window: 12,
                same_target_min_calls: 3,
                follow_up_lock_threshold: 6,
                skipped_tool_only_turn_threshold: 4,
                varied_failure_threshold: 6,
            },
            TaskDomain::Research | TaskDomain::Writing | TaskDomain::General => Self {
                max_tool_use_streak: 8,
                low_progress_window: 8,
                same_target_min_calls: 3,
                follow_up_lock_threshold: 3,
                skipped_tool_only_turn_threshold: 2,
                varied_failure_threshold: 3,
            },
            TaskDomain::Auto | TaskDomain::Other(_) => Self {
                max_tool_use_streak: 12,
                low_progress_window: 10,
                same_target_min_calls: 3,
                follow_up_lock_threshold: 4,
                skipped_tool_only_turn_threshold: 3,
                varied_failure_threshold: 4,
            },
        }
    }
}
