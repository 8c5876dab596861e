//! Completion contract: what evidence a task's final answer must show.
//!
//! The contract is derived once from the task title + prompt with keyword
//! heuristics and never mutated afterwards. At the end of an attempt the
//! evaluator judges the best candidate response against it; each unmet
//! requirement fails with its own distinct reason string.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::traits::{PlanStep, PlanStepStatus};

static ACTION_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(create|build|write|generate|transcribe|summarize|analyze|review|fix|implement|run|execute)\b",
    )
    .expect("action verb regex")
});

static CREATION_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(create|build|write|generate|produce|make|draft|compile)\b")
        .expect("creation verb regex")
});

static ARTIFACT_NOUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(report|document|file|spreadsheet|presentation|slides|deck)\b")
        .expect("artifact noun regex")
});

static FILE_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(pdf|docx|md|csv|xlsx|json|txt|pptx)\b").expect("file type regex")
});

/// Watch/skip recommendation tasks are decision-only: no artifact expected.
static WATCH_SKIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(watch|skip)\b.*\brecommend(ation)?\b|\brecommend(ation)?\b.*\b(watch|skip)\b")
        .expect("watch/skip regex")
});

static REVIEW_CUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(review|evaluate|verify)\b").expect("review cue regex"));

static JUDGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(should|worth|decide|recommend|judge|assess)\b").expect("judgment regex")
});

static EVIDENCE_GATHER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(check|research|search|look up|find|fetch|investigate)\b")
        .expect("evidence gathering regex")
});

static SEQUENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(then|after)\b").expect("sequence regex"));

/// Pure status reports: a terse completion claim with no actual answer.
static STATUS_REPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(done|completed|finished|task (is )?(done|complete|completed|finished)|i('ve| have) (created|completed|finished|saved|updated|written)\b)",
    )
    .expect("status report regex")
});

static CREATED_SAVED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Created|Saved): \S.*$").expect("created/saved regex"));

static REASONING_CUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(because|since|therefore|which means|based on)\b").expect("reasoning regex")
});

/// Plan steps whose description reads as a verification step.
static VERIFY_STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(verify|review|validate|double-check|confirm|test)\b")
        .expect("verify step regex")
});

/// Review-backed conclusion signals in the candidate text itself.
static REVIEWED_CONCLUSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(verified|confirmed|reviewed|validated|checked that)\b")
        .expect("reviewed conclusion regex")
});

static REASONED_CONCLUSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(because|therefore|based on|in conclusion|overall)\b")
        .expect("reasoned conclusion regex")
});

/// Minimum candidate length for a text-only deliverable to stand in for a
/// missing artifact.
const SUBSTANTIVE_CANDIDATE_CHARS: usize = 50;

/// Evidentiary requirements a task's final answer must satisfy. Immutable
/// for the task's lifetime once derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContract {
    pub requires_execution_evidence: bool,
    pub requires_direct_answer: bool,
    pub requires_decision_signal: bool,
    pub requires_artifact_evidence: bool,
    pub requires_verification_evidence: bool,
    /// Expected artifact extensions with leading dot, sorted; may be empty.
    pub required_artifact_extensions: Vec<String>,
}

impl CompletionContract {
    /// Derive the contract from title + prompt. Direct-answer and
    /// decision-signal flags come from the host's prompt heuristics.
    /// Deriving twice from the same inputs yields identical contracts.
    pub fn derive(
        title: &str,
        prompt: &str,
        requires_direct_answer: bool,
        requires_decision_signal: bool,
    ) -> Self {
        let text = format!("{title}\n{prompt}");

        let requires_execution_evidence = ACTION_VERB_RE.is_match(&text);
        let decision_only = WATCH_SKIP_RE.is_match(&text);

        let mut extensions: Vec<String> = FILE_TYPE_RE
            .find_iter(&text)
            .map(|m| format!(".{}", m.as_str().to_ascii_lowercase()))
            .collect();
        extensions.sort();
        extensions.dedup();

        let names_artifact =
            CREATION_VERB_RE.is_match(&text) && ARTIFACT_NOUN_RE.is_match(&text);
        let requires_artifact_evidence =
            !decision_only && (names_artifact || !extensions.is_empty());
        if !requires_artifact_evidence {
            extensions.clear();
        }

        let shows_review_cues = REVIEW_CUE_RE.is_match(&text)
            || (JUDGMENT_RE.is_match(&text)
                && EVIDENCE_GATHER_RE.is_match(&text)
                && SEQUENCE_RE.is_match(&text));
        let requires_verification_evidence = requires_execution_evidence && shows_review_cues;

        Self {
            requires_execution_evidence,
            requires_direct_answer,
            requires_decision_signal,
            requires_artifact_evidence,
            requires_verification_evidence,
            required_artifact_extensions: extensions,
        }
    }
}

/// Candidate sources for "what the task produced", in priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateSources<'a> {
    pub result_summary: Option<&'a str>,
    pub last_assistant_text: Option<&'a str>,
    pub last_non_verification_output: Option<&'a str>,
    pub last_raw_output: Option<&'a str>,
}

impl<'a> CandidateSources<'a> {
    fn ordered(&self) -> [Option<&'a str>; 4] {
        [
            self.result_summary,
            self.last_assistant_text,
            self.last_non_verification_output,
            self.last_raw_output,
        ]
    }
}

/// First non-empty trimmed source wins.
pub fn best_candidate(sources: &CandidateSources<'_>) -> Option<String> {
    sources
        .ordered()
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Everything the evaluator needs beyond the contract itself.
#[derive(Debug, Clone, Copy)]
pub struct CompletionInputs<'a> {
    pub contract: &'a CompletionContract,
    pub sources: CandidateSources<'a>,
    pub created_files: &'a [String],
    pub plan_steps: &'a [PlanStep],
    /// Whether any tool executed successfully this attempt.
    pub had_any_tool_success: bool,
    /// Whether a search/fetch tool produced evidence this attempt.
    pub used_search_or_fetch: bool,
    /// Soft-deadline or timeout cancellation: accept a non-empty candidate
    /// before any check runs.
    pub best_effort: bool,
}

/// Outcome of contract evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionVerdict {
    Satisfied {
        candidate: String,
        /// True when the best-effort bypass accepted the candidate without
        /// running any check.
        via_best_effort: bool,
    },
    Failed {
        reason: String,
    },
}

/// Does this text read as a pure operational status report rather than an
/// answer?
fn is_operational_only(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if CREATED_SAVED_RE.is_match(trimmed) {
        return true;
    }
    let sentences = trimmed
        .split(['.', '?', '!'])
        .filter(|s| !s.trim().is_empty())
        .count();
    STATUS_REPORT_RE.is_match(trimmed)
        && !REASONING_CUE_RE.is_match(trimmed)
        && sentences <= 2
        && trimmed.chars().count() < 320
}

fn file_matches_extensions(path: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let lowered = path.to_ascii_lowercase();
    extensions.iter().any(|ext| lowered.ends_with(ext.as_str()))
}

/// Judge the final candidate response against the contract. Checks run in
/// order and the first failure short-circuits with its reason.
pub fn evaluate_completion(inputs: &CompletionInputs<'_>) -> CompletionVerdict {
    let candidate = best_candidate(&inputs.sources);

    if inputs.best_effort {
        if let Some(candidate) = candidate.clone() {
            return CompletionVerdict::Satisfied {
                candidate,
                via_best_effort: true,
            };
        }
    }
    let candidate = candidate.unwrap_or_default();
    let contract = inputs.contract;

    // 1. Execution evidence.
    if contract.requires_execution_evidence && !inputs.had_any_tool_success {
        return CompletionVerdict::Failed {
            reason: "Task missing execution evidence: the task asked for work to be performed \
                     but no tool execution succeeded."
                .to_string(),
        };
    }

    // 2. Artifact evidence. A substantive text answer is accepted only when
    // literally zero files were created (text-only deliverable).
    if contract.requires_artifact_evidence {
        let matching = inputs
            .created_files
            .iter()
            .any(|f| file_matches_extensions(f, &contract.required_artifact_extensions));
        if inputs.created_files.is_empty() || !matching {
            let text_only_ok = inputs.created_files.is_empty()
                && candidate.chars().count() >= SUBSTANTIVE_CANDIDATE_CHARS;
            if !text_only_ok {
                return CompletionVerdict::Failed {
                    reason: "Task missing artifact evidence: expected an output file/document \
                             but no created file was detected."
                        .to_string(),
                };
            }
        }
    }

    // 3. Direct answer.
    if contract.requires_direct_answer && is_operational_only(&candidate) {
        let fallback_answers = inputs
            .sources
            .ordered()
            .into_iter()
            .flatten()
            .any(|s| !s.trim().is_empty() && !is_operational_only(s));
        if !fallback_answers {
            return CompletionVerdict::Failed {
                reason: "Task missing direct answer: the response reads as a status report \
                         without the answer the task asked for."
                    .to_string(),
            };
        }
    }

    // 4. Verification evidence.
    if contract.requires_verification_evidence {
        let verified_step = inputs.plan_steps.iter().any(|s| {
            s.status == PlanStepStatus::Completed && VERIFY_STEP_RE.is_match(&s.description)
        });
        let reviewed_conclusion = REVIEWED_CONCLUSION_RE.is_match(&candidate);
        let research_backed =
            inputs.used_search_or_fetch && REASONED_CONCLUSION_RE.is_match(&candidate);
        if !verified_step
            && !reviewed_conclusion
            && !research_backed
            && inputs.created_files.is_empty()
        {
            return CompletionVerdict::Failed {
                reason: "Task missing verification evidence: no verification step, \
                         review-backed conclusion, or corroborating research was found."
                    .to_string(),
            };
        }
    }

    CompletionVerdict::Satisfied {
        candidate,
        via_best_effort: false,
    }
}
