//! The task execution loop: multi-turn model/tool exchanges under budgets,
//! policy gates, loop guardrails, and completion adjudication.

mod budget;
mod lifecycle;
mod normalize;
mod output;
mod policy;

#[path = "loop/loop_guard.rs"]
mod loop_guard;
#[path = "loop/recovery.rs"]
mod recovery;

#[path = "completion/contract.rs"]
mod contract;
#[path = "completion/domain.rs"]
mod domain;

pub use budget::{compute_call_budget, BudgetInputs, BudgetedModelCall, CallBudget};
pub use contract::{
    best_candidate, evaluate_completion, CandidateSources, CompletionContract, CompletionInputs,
    CompletionVerdict,
};
pub use domain::{evaluate_domain_completion, DomainVerdict};
pub use lifecycle::LifecycleMutex;
pub use loop_guard::{AllFailedDecision, LoopGuard, RecentToolCalls, VariedFailureNudge};
pub use normalize::{
    cancelled_result, classify_failure, disabled_tool_result, normalize_tool_output,
    resolve_duplicate, resolve_redundant_file_op, unavailable_tool_result, validate_tool_input,
    CommandTermination, FailureSeverity, FailureSignals, PersistentToolFailures, ToolFailureKind,
};
pub use output::{asks_question, process_assistant_output, sanitize_assistant_text, ProcessedOutput};
pub use policy::{
    evaluate_tool_policy, filter_tools_by_policy, is_mutating_tool, normalize_execution_mode,
    BlockedTool, PolicyDecision,
};
pub use recovery::{MaxTokensRecovery, RecoveryOutcome};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ExecutorConfig, LoopGuardrailConfig};
use crate::events::{
    ExecutorEvent, ExecutorEventData, ToolRecoveryPromptedData, VariedFailureData,
    WorkspaceSwitchData,
};
use crate::traits::{
    ComplianceChecker, DuplicateCheck, DuplicateChecker, EventSink, ExecutionMode, Message,
    ModelResponse, PlanStep, StopReason, TaskDomain, ToolCall, ToolResult, ToolRunner,
};

const ALL_FAILED_RECOVERY_HINT: &str = "Every tool call in your last turn failed. Read the error \
     messages carefully, fix the inputs or switch to a different tool, and make your next turn \
     count.";

const DECISION_SIGNAL_INSTRUCTION: &str = "This task requires an explicit decision. End your \
     final response with a clear verdict, not just supporting analysis.";

/// Everything the executor needs to know about one task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub prompt: String,
    pub domain: TaskDomain,
    /// Explicit execution mode; `None` falls back to the conversation hint.
    pub execution_mode: Option<ExecutionMode>,
    pub conversation_mode_hint: Option<String>,
    pub requires_direct_answer: bool,
    pub requires_decision_signal: bool,
    /// Candidate tool names, pre-policy.
    pub tool_names: Vec<String>,
    /// JSON tool schemas as sent to the model; matched to names by their
    /// top-level "name" field.
    pub tool_schemas: Vec<Value>,
    pub system_prompt: String,
    pub plan_steps: Vec<PlanStep>,
}

/// Cooperative cancellation flags, shared with the host. `best_effort`
/// additionally asks the loop to salvage a partial answer instead of
/// failing the completion checks.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    best_effort: AtomicBool,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel while accepting whatever answer the loop has so far.
    pub fn cancel_best_effort(&self) {
        self.best_effort.store(true, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort.load(Ordering::SeqCst)
    }
}

/// Final adjudicated outcome of one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { text: String },
    Failed { reason: String },
}

pub struct TaskExecutor {
    config: ExecutorConfig,
    lifecycle: LifecycleMutex,
    model: BudgetedModelCall,
    tools: Arc<dyn ToolRunner>,
    duplicates: Arc<dyn DuplicateChecker>,
    compliance: Arc<dyn ComplianceChecker>,
    events: Arc<dyn EventSink>,
}

/// Best-guess human-readable target of a tool call, for loop detection.
fn call_target(input: &Value) -> String {
    for key in ["path", "filename", "url", "query", "command", "name"] {
        if let Some(v) = input.get(key).and_then(Value::as_str) {
            return v.to_string();
        }
    }
    input.to_string().chars().take(120).collect()
}

fn is_search_or_fetch(name: &str) -> bool {
    name.starts_with("web_") || name.contains("search") || name.contains("fetch")
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        model: BudgetedModelCall,
        tools: Arc<dyn ToolRunner>,
        duplicates: Arc<dyn DuplicateChecker>,
        compliance: Arc<dyn ComplianceChecker>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            lifecycle: LifecycleMutex::new(),
            model,
            tools,
            duplicates,
            compliance,
            events,
        }
    }

    /// Whether an attempt currently holds the lifecycle lock.
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_locked()
    }

    /// Run one task attempt end to end. Concurrent callers queue in FIFO
    /// order; exactly one attempt executes at a time.
    pub async fn run_task(
        &self,
        spec: &TaskSpec,
        cancel: &CancelSignal,
    ) -> anyhow::Result<TaskOutcome> {
        self.lifecycle
            .run_exclusive(|| self.run_attempt(spec, cancel))
            .await
    }

    async fn run_attempt(
        &self,
        spec: &TaskSpec,
        cancel: &CancelSignal,
    ) -> anyhow::Result<TaskOutcome> {
        let attempt_id = Uuid::new_v4();
        let mode = normalize_execution_mode(
            spec.execution_mode,
            spec.conversation_mode_hint.as_deref(),
        );
        let contract = CompletionContract::derive(
            &spec.title,
            &spec.prompt,
            spec.requires_direct_answer,
            spec.requires_decision_signal,
        );

        let (allowed_tools, blocked) =
            filter_tools_by_policy(&spec.tool_names, mode, &spec.domain);
        for b in &blocked {
            info!(task_id = %spec.id, tool = %b.name, reason = %b.reason, "Tool blocked by policy");
        }
        let tool_schemas: Vec<Value> = spec
            .tool_schemas
            .iter()
            .filter(|schema| {
                schema
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| allowed_tools.iter().any(|a| a == n))
            })
            .cloned()
            .collect();

        let mut system_prompt = spec.system_prompt.clone();
        if contract.requires_decision_signal {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(DECISION_SIGNAL_INSTRUCTION);
        }

        info!(
            task_id = %spec.id,
            %attempt_id,
            domain = %spec.domain,
            ?mode,
            tool_count = tool_schemas.len(),
            "Starting task attempt"
        );

        let guardrails = LoopGuardrailConfig::for_domain(&spec.domain);
        let mut guard = LoopGuard::new(guardrails, self.config.recent_calls_window);
        let mut recovery = MaxTokensRecovery::new(self.config.max_tokens_recovery_attempts);
        let mut failures = PersistentToolFailures::default();
        let mut history = vec![Message::user_text(spec.prompt.clone())];

        let mut last_assistant_text: Option<String> = None;
        let mut last_raw_output: Option<String> = None;
        let mut had_any_tool_success = false;
        let mut used_search_or_fetch = false;
        let mut prior_max_tokens: Option<u32> = None;
        let mut tool_only_streak = 0usize;
        let mut skipped_only_streak = 0usize;
        let mut turns_without_progress = 0usize;
        let mut produced_targets: HashSet<String> = HashSet::new();

        let mut iteration = 0usize;
        while iteration < self.config.max_iterations {
            iteration += 1;
            if cancel.is_cancelled() {
                info!(task_id = %spec.id, iteration, "Cancellation observed; ending the loop");
                break;
            }

            let (response, budget_used) = self
                .model
                .call(
                    &spec.id,
                    &system_prompt,
                    &history,
                    &tool_schemas,
                    recovery.attempts(),
                    prior_max_tokens,
                )
                .await?;
            let response = self.model.maybe_refine(response).await?;

            match recovery.handle(&spec.id, &response, &mut history, &*self.events) {
                RecoveryOutcome::Retry => {
                    prior_max_tokens = Some(budget_used);
                    continue;
                }
                RecoveryOutcome::Exhausted => {
                    let partial = response.joined_text();
                    if !partial.trim().is_empty() {
                        last_raw_output = Some(partial);
                    }
                    break;
                }
                RecoveryOutcome::NotTruncated => {
                    prior_max_tokens = None;
                }
            }

            history.push(Message {
                role: crate::traits::Role::Assistant,
                content: response.content.clone(),
            });

            let raw_text = response.joined_text();
            if !raw_text.trim().is_empty() {
                last_raw_output = Some(raw_text.clone());
            }
            let processed = process_assistant_output(
                &spec.id,
                &raw_text,
                Value::Null,
                &*self.compliance,
                &*self.events,
            );
            if processed.has_meaningful_text {
                last_assistant_text = Some(processed.text.clone());
            }

            let calls = tool_calls_of(&response);
            if calls.is_empty() {
                if response.stop_reason != StopReason::EndTurn {
                    warn!(
                        task_id = %spec.id,
                        stop_reason = ?response.stop_reason,
                        "Turn ended without tool calls or an end-turn signal"
                    );
                }
                break;
            }

            let mut result_blocks = Vec::with_capacity(calls.len());
            let mut kinds: Vec<Option<ToolFailureKind>> = Vec::with_capacity(calls.len());
            let mut any_executed = false;
            for call in &calls {
                let (result, kind, executed) = self
                    .resolve_call(
                        spec,
                        mode,
                        call,
                        &allowed_tools,
                        cancel,
                        &mut failures,
                        &mut produced_targets,
                        &mut had_any_tool_success,
                        &mut used_search_or_fetch,
                    )
                    .await;
                guard.record_call(&call.name, &call_target(&call.input));
                any_executed |= executed;
                kinds.push(kind);
                result_blocks.push(result.into_block());
            }
            history.push(Message {
                role: crate::traits::Role::User,
                content: result_blocks,
            });

            if processed.asked_question {
                // The question surfaces to the user, but only after every
                // call in the turn has its matching result.
                break;
            }

            let turn_succeeded = kinds.iter().any(Option::is_none);
            tool_only_streak = if processed.has_meaningful_text {
                0
            } else {
                tool_only_streak + 1
            };
            skipped_only_streak = if any_executed { 0 } else { skipped_only_streak + 1 };
            turns_without_progress = if turn_succeeded || processed.has_meaningful_text {
                0
            } else {
                turns_without_progress + 1
            };
            if tool_only_streak > guardrails.max_tool_use_streak {
                warn!(task_id = %spec.id, iteration, streak = tool_only_streak, "Tool-use-only streak exceeded; ending the loop");
                break;
            }
            if skipped_only_streak > guardrails.skipped_tool_only_turn_threshold {
                warn!(task_id = %spec.id, iteration, streak = skipped_only_streak, "Consecutive turns resolved without executing any tool; ending the loop");
                break;
            }
            if turns_without_progress >= guardrails.low_progress_window {
                warn!(task_id = %spec.id, iteration, window = turns_without_progress, "No progress within the low-progress window; ending the loop");
                break;
            }

            guard.maybe_inject_tool_loop_break(&mut history);
            if let Some(nudge) = guard.maybe_inject_varied_failure_nudge(&failures, &mut history) {
                self.events.emit(ExecutorEvent::new(
                    &spec.id,
                    ExecutorEventData::VariedFailure(VariedFailureData {
                        tool: nudge.tool,
                        consecutive_failures: nudge.consecutive_failures,
                    }),
                ));
            }
            let decision =
                guard.evaluate_all_failed_turn(&kinds, iteration, self.config.max_iterations);
            if decision.inject_recovery_hint {
                history.push(Message::user_text(ALL_FAILED_RECOVERY_HINT));
                self.events.emit(ExecutorEvent::new(
                    &spec.id,
                    ExecutorEventData::ToolRecoveryPrompted(ToolRecoveryPromptedData {
                        iteration,
                    }),
                ));
            }
            if decision.stop {
                warn!(task_id = %spec.id, iteration, "Ending the loop after an all-failed tool turn");
                break;
            }
        }

        let created_files = self.tools.created_files().await;
        let verdict = evaluate_completion(&CompletionInputs {
            contract: &contract,
            sources: CandidateSources {
                result_summary: None,
                last_assistant_text: last_assistant_text.as_deref(),
                last_non_verification_output: None,
                last_raw_output: last_raw_output.as_deref(),
            },
            created_files: &created_files,
            plan_steps: &spec.plan_steps,
            had_any_tool_success,
            used_search_or_fetch,
            best_effort: cancel.is_best_effort(),
        });

        let outcome = match verdict {
            CompletionVerdict::Failed { reason } => TaskOutcome::Failed { reason },
            CompletionVerdict::Satisfied {
                candidate,
                via_best_effort,
            } => {
                if via_best_effort {
                    TaskOutcome::Success { text: candidate }
                } else {
                    match evaluate_domain_completion(
                        &spec.domain,
                        &candidate,
                        had_any_tool_success,
                        true,
                    ) {
                        DomainVerdict::Pass => TaskOutcome::Success { text: candidate },
                        DomainVerdict::Fail { reason } => TaskOutcome::Failed { reason },
                    }
                }
            }
        };

        info!(
            task_id = %spec.id,
            %attempt_id,
            iterations = iteration,
            created_files = created_files.len(),
            success = matches!(outcome, TaskOutcome::Success { .. }),
            "Task attempt finished"
        );
        Ok(outcome)
    }

    /// Resolve one tool call into exactly one result: policy gate, input
    /// validation, duplicate check, then watchdog-bounded execution. The
    /// final flag says whether the runner was actually invoked.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_call(
        &self,
        spec: &TaskSpec,
        mode: ExecutionMode,
        call: &ToolCall,
        allowed_tools: &[String],
        cancel: &CancelSignal,
        failures: &mut PersistentToolFailures,
        produced_targets: &mut HashSet<String>,
        had_any_tool_success: &mut bool,
        used_search_or_fetch: &mut bool,
    ) -> (ToolResult, Option<ToolFailureKind>, bool) {
        if cancel.is_cancelled() {
            return (
                cancelled_result(call, false),
                Some(ToolFailureKind::Soft),
                false,
            );
        }

        if !allowed_tools.iter().any(|a| a == &call.name) {
            let decision = evaluate_tool_policy(&call.name, mode, &spec.domain);
            if !decision.allowed {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "blocked by policy".to_string());
                failures.record_failure(&call.name);
                return (
                    ToolResult::error(call, reason),
                    Some(ToolFailureKind::Hard),
                    false,
                );
            }
            return (
                unavailable_tool_result(call).0,
                Some(ToolFailureKind::Unavailable),
                false,
            );
        }

        if let Some(invalid) = validate_tool_input(call) {
            failures.record_failure(&call.name);
            return (invalid, Some(ToolFailureKind::Soft), false);
        }

        match self.duplicates.check(&call.name, &call.input).await {
            DuplicateCheck::Duplicate { cached, idempotent } => {
                let (result, kind) = resolve_duplicate(call, cached, idempotent);
                if kind.is_some() {
                    failures.record_failure(&call.name);
                }
                return (result, kind, false);
            }
            DuplicateCheck::Fresh => {}
        }

        if loop_guard::is_file_writing_tool(&call.name) {
            let target = call_target(&call.input);
            if produced_targets.contains(&target) {
                failures.record_failure(&call.name);
                let (result, kind) = resolve_redundant_file_op(call, &target, None, false);
                return (result, kind, false);
            }
        }

        let execution = match self.config.tool_call_timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), self.tools.run_tool(call))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => {
                        warn!(task_id = %spec.id, tool = %call.name, timeout_secs = secs, "Tool call hit the watchdog timeout");
                        failures.record_failure(&call.name);
                        let body = normalize_tool_output(
                            &call.name,
                            "",
                            Some(CommandTermination::Timeout),
                            self.config.max_tool_output_chars,
                        );
                        let body = if body.is_empty() {
                            format!("Tool '{}' timed out after {secs}s.", call.name)
                        } else {
                            body
                        };
                        return (
                            ToolResult::error(call, body),
                            Some(ToolFailureKind::Soft),
                            true,
                        );
                    }
                }
            }
            None => self.tools.run_tool(call).await,
        };

        match execution {
            Ok(raw) => {
                let body = normalize_tool_output(
                    &call.name,
                    &raw,
                    None,
                    self.config.max_tool_output_chars,
                );
                failures.record_success(&call.name);
                self.duplicates.record(&call.name, &call.input, &body).await;
                *had_any_tool_success = true;
                if loop_guard::is_file_writing_tool(&call.name) {
                    produced_targets.insert(call_target(&call.input));
                }
                if is_search_or_fetch(&call.name) {
                    *used_search_or_fetch = true;
                }
                if call.name == "switch_workspace" {
                    let workspace = call
                        .input
                        .get("workspace")
                        .or_else(|| call.input.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("default")
                        .to_string();
                    self.events.emit(ExecutorEvent::new(
                        &spec.id,
                        ExecutorEventData::WorkspaceSwitch(WorkspaceSwitchData { workspace }),
                    ));
                }
                (ToolResult::ok(call, body), None, true)
            }
            Err(err) => {
                let message = err.to_string();
                let severity = classify_failure(&FailureSignals::default(), &message);
                failures.record_failure(&call.name);
                let kind = match severity {
                    FailureSeverity::Hard => ToolFailureKind::Hard,
                    FailureSeverity::Soft => ToolFailureKind::Soft,
                };
                let body = normalize_tool_output(
                    &call.name,
                    &message,
                    None,
                    self.config.max_tool_output_chars,
                );
                (ToolResult::error(call, body), Some(kind), true)
            }
        }
    }
}

fn tool_calls_of(response: &ModelResponse) -> Vec<ToolCall> {
    response
        .content
        .iter()
        .filter_map(|b| match b {
            crate::traits::ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect()
}
