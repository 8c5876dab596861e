//! Adaptive per-call token budgets and timeouts.
//!
//! The injected `ModelClient` owns transport and backoff; this module only
//! computes how large each request is allowed to be, logs call pre- and
//! postconditions, forwards usage to the tracker, and optionally re-drafts a
//! finished answer through quality passes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::traits::{
    ContentBlock, DraftRefiner, Message, ModelClient, ModelRequest, ModelResponse, StopReason,
    UsageTracker,
};

/// Rough chars-per-token estimate; close enough for budget shaping.
const CHARS_PER_TOKEN: usize = 4;
const BASE_MAX_TOKENS: u32 = 8_192;
const MIN_MAX_TOKENS: u32 = 1_024;
const BASE_TIMEOUT_SECS: u64 = 180;
const MIN_TIMEOUT_SECS: u64 = 45;
/// Large conversations shave the output budget by one token per this many
/// estimated input tokens, so long histories leave transport headroom.
const INPUT_SHAVE_DIVISOR: usize = 16;

/// Inputs to one budget computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetInputs {
    pub message_chars: usize,
    pub system_prompt_chars: usize,
    /// Retry attempt within this turn (0 = first call).
    pub attempt: u32,
    /// Budget of the previous attempt, when that attempt timed out or was
    /// truncated. Retries must not repeat a timeout with the same size.
    pub prior_max_tokens: Option<u32>,
}

/// Token cap and timeout for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Compute the cap/timeout for one call. Both shrink with the attempt number
/// and with the prior budget so a retried request is always strictly smaller.
pub fn compute_call_budget(inputs: &BudgetInputs) -> CallBudget {
    let estimated_input = (inputs.message_chars + inputs.system_prompt_chars) / CHARS_PER_TOKEN;
    let shaved = BASE_MAX_TOKENS.saturating_sub((estimated_input / INPUT_SHAVE_DIVISOR) as u32);
    let mut max_tokens = shaved.max(MIN_MAX_TOKENS);

    if let Some(prior) = inputs.prior_max_tokens {
        max_tokens = max_tokens.min((prior.saturating_mul(3) / 5).max(MIN_MAX_TOKENS));
    }
    for _ in 0..inputs.attempt {
        max_tokens = (max_tokens.saturating_mul(3) / 5).max(MIN_MAX_TOKENS);
    }

    let timeout_secs = BASE_TIMEOUT_SECS
        .saturating_sub(u64::from(inputs.attempt) * 45)
        .max(MIN_TIMEOUT_SECS);

    CallBudget {
        max_tokens,
        timeout: Duration::from_secs(timeout_secs),
    }
}

/// Budget-aware model caller with optional quality passes.
pub struct BudgetedModelCall {
    client: Arc<dyn ModelClient>,
    usage: Arc<dyn UsageTracker>,
    refiner: Option<Arc<dyn DraftRefiner>>,
    quality_passes: Option<u8>,
}

impl BudgetedModelCall {
    pub fn new(
        client: Arc<dyn ModelClient>,
        usage: Arc<dyn UsageTracker>,
        refiner: Option<Arc<dyn DraftRefiner>>,
        quality_passes: Option<u8>,
    ) -> Self {
        Self {
            client,
            usage,
            refiner,
            quality_passes,
        }
    }

    /// Dispatch one model call under a computed budget. Returns the response
    /// and the budget used, so the caller can thread it into a retry.
    pub async fn call(
        &self,
        task_id: &str,
        system_prompt: &str,
        messages: &[Message],
        tools: &[Value],
        attempt: u32,
        prior_max_tokens: Option<u32>,
    ) -> anyhow::Result<(ModelResponse, u32)> {
        let message_chars: usize = messages.iter().map(Message::char_len).sum();
        let budget = compute_call_budget(&BudgetInputs {
            message_chars,
            system_prompt_chars: system_prompt.len(),
            attempt,
            prior_max_tokens,
        });

        info!(
            task_id,
            message_count = messages.len(),
            tool_count = tools.len(),
            max_tokens = budget.max_tokens,
            timeout_secs = budget.timeout.as_secs(),
            attempt,
            "Dispatching model call"
        );

        let response = self
            .client
            .call_with_retry(ModelRequest {
                system_prompt,
                messages,
                tools,
                max_tokens: budget.max_tokens,
                timeout: budget.timeout,
            })
            .await?;

        info!(
            task_id,
            stop_reason = ?response.stop_reason,
            input_tokens = response.usage.as_ref().map(|u| u.input_tokens),
            output_tokens = response.usage.as_ref().map(|u| u.output_tokens),
            "Model call completed"
        );
        if let Some(usage) = &response.usage {
            self.usage.record_usage(usage);
        }

        Ok((response, budget.max_tokens))
    }

    /// Quality pass: re-draft a finished, tool-free, non-empty answer. An
    /// empty or identical refinement returns the original response unchanged
    /// so a no-op pass never double-counts as an improvement.
    pub async fn maybe_refine(&self, response: ModelResponse) -> anyhow::Result<ModelResponse> {
        let Some(refiner) = &self.refiner else {
            return Ok(response);
        };
        let Some(passes) = self.quality_passes else {
            return Ok(response);
        };
        if response.stop_reason != StopReason::EndTurn || response.has_tool_use() {
            return Ok(response);
        }
        let original = response.joined_text();
        if original.trim().is_empty() {
            return Ok(response);
        }

        let passes = passes.clamp(2, 3);
        let refined = refiner.refine(&original, passes).await?;
        if refined.trim().is_empty() || refined == original {
            debug!("Refinement produced no improvement; keeping original draft");
            return Ok(response);
        }

        Ok(ModelResponse {
            stop_reason: response.stop_reason,
            content: vec![ContentBlock::Text { text: refined }],
            usage: response.usage,
        })
    }
}
