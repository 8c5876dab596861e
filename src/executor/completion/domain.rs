//! Domain-specific completion guardrails.
//!
//! A last, cheap sanity check applied after the contract passes: does the
//! final text meet the minimum substance bar for its task domain? Code and
//! operations tasks legitimately finish with terse or empty text, so they
//! are exempt.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::traits::TaskDomain;

/// Research answers must point at what was found, not just assert it.
static FINDINGS_SIGNAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(found|finding|source|evidence|according|result|conclusion|summary|data)\b|\[\d+\]",
    )
    .expect("findings signal regex")
});

const NON_SUBSTANTIVE: &[&str] = &["done", "ok", "all set", "finished"];

const RESEARCH_MIN_CHARS: usize = 80;
const WRITING_MIN_CHARS: usize = 120;
const GENERAL_MIN_CHARS: usize = 40;

/// Verdict of the domain guardrail. Failures name what was missing so the
/// task record explains itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainVerdict {
    Pass,
    Fail { reason: String },
}

fn is_non_substantive(text: &str) -> bool {
    let lowered = text.trim().trim_end_matches('.').to_ascii_lowercase();
    NON_SUBSTANTIVE.contains(&lowered.as_str())
}

/// Apply the domain guardrail to the final candidate text. Only runs on the
/// last step of a task; mid-plan steps pass unconditionally.
pub fn evaluate_domain_completion(
    domain: &TaskDomain,
    candidate: &str,
    had_any_tool_success: bool,
    is_last_step: bool,
) -> DomainVerdict {
    if !is_last_step {
        return DomainVerdict::Pass;
    }
    if matches!(domain, TaskDomain::Code | TaskDomain::Operations) {
        return DomainVerdict::Pass;
    }

    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        if had_any_tool_success {
            return DomainVerdict::Fail {
                reason: format!(
                    "Tools ran successfully but the final response for this {domain} task was \
                     empty."
                ),
            };
        }
        return DomainVerdict::Pass;
    }
    if is_non_substantive(trimmed) {
        return DomainVerdict::Fail {
            reason: format!(
                "The final response ('{trimmed}') is a bare acknowledgement, not an answer for \
                 a {domain} task."
            ),
        };
    }

    let chars = trimmed.chars().count();
    match domain {
        TaskDomain::Research => {
            if chars < RESEARCH_MIN_CHARS || !FINDINGS_SIGNAL_RE.is_match(trimmed) {
                return DomainVerdict::Fail {
                    reason: "A research task must end with substantive findings: what was \
                             found, where, and what it means."
                        .to_string(),
                };
            }
        }
        TaskDomain::Writing => {
            if chars < WRITING_MIN_CHARS {
                return DomainVerdict::Fail {
                    reason: "A writing task must end with the written deliverable, not a short \
                             note about it."
                        .to_string(),
                };
            }
        }
        TaskDomain::General | TaskDomain::Auto => {
            if chars < GENERAL_MIN_CHARS {
                return DomainVerdict::Fail {
                    reason: "The final response is too short to stand as the task's answer."
                        .to_string(),
                };
            }
        }
        _ => {}
    }
    DomainVerdict::Pass
}
