//! Recovery from model-side output truncation.
//!
//! A turn that stops with `MaxTokens` left the conversation in a half-written
//! state. The recovery path appends the best available partial text, then
//! instructs the model to continue in smaller pieces. After the configured
//! number of attempts the loop surfaces the truncation as a terminal state
//! instead of retrying forever.

use tracing::warn;

use crate::events::{ExecutorEvent, ExecutorEventData, MaxTokensRecoveryData};
use crate::traits::{EventSink, Message, ModelResponse, StopReason};

/// Placeholder appended when a truncated turn carried no text blocks at all.
const CONTINUATION_PLACEHOLDER: &str = "[partial response truncated at the output-token limit]";

const CONTINUE_INSTRUCTION: &str = "Your previous reply hit the output-token limit and was cut \
     off. Split the remaining work across smaller tool calls, avoid parallel tool calls, and \
     continue from exactly where you stopped.";

/// What the loop should do after inspecting one turn for truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Stop reason was something else; no action taken.
    NotTruncated,
    /// Partial text and a continuation instruction were appended; call again.
    Retry,
    /// Attempt cap exceeded; partial text was appended and the caller must
    /// stop retrying and surface the loop as ended.
    Exhausted,
}

#[derive(Debug)]
pub struct MaxTokensRecovery {
    attempts: u32,
    max_attempts: u32,
}

impl MaxTokensRecovery {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the counter for a new attempt phase.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Inspect one model turn and rewrite the conversation if it was
    /// truncated. Emits a recovery event on every truncated attempt.
    pub fn handle(
        &mut self,
        task_id: &str,
        response: &ModelResponse,
        history: &mut Vec<Message>,
        events: &dyn EventSink,
    ) -> RecoveryOutcome {
        if response.stop_reason != StopReason::MaxTokens {
            return RecoveryOutcome::NotTruncated;
        }

        self.attempts += 1;
        events.emit(ExecutorEvent::new(
            task_id,
            ExecutorEventData::MaxTokensRecovery(MaxTokensRecoveryData {
                attempt: self.attempts,
                max_attempts: self.max_attempts,
            }),
        ));

        let partial = response.joined_text();
        let partial = if partial.trim().is_empty() {
            CONTINUATION_PLACEHOLDER.to_string()
        } else {
            partial
        };

        if self.attempts > self.max_attempts {
            warn!(
                task_id,
                attempts = self.attempts,
                max_attempts = self.max_attempts,
                "Max-tokens recovery exhausted; ending the loop with partial output"
            );
            history.push(Message::assistant_text(partial));
            return RecoveryOutcome::Exhausted;
        }

        warn!(
            task_id,
            attempt = self.attempts,
            max_attempts = self.max_attempts,
            "Model turn truncated at the output-token limit; rewriting conversation to recover"
        );
        history.push(Message::assistant_text(partial));
        history.push(Message::user_text(CONTINUE_INSTRUCTION));
        RecoveryOutcome::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ContentBlock;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ExecutorEvent>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: ExecutorEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn truncated(text: Option<&str>) -> ModelResponse {
        ModelResponse {
            stop_reason: StopReason::MaxTokens,
            content: text
                .map(|t| {
                    vec![ContentBlock::Text {
                        text: t.to_string(),
                    }]
                })
                .unwrap_or_default(),
            usage: None,
        }
    }

    #[test]
    fn non_truncated_turns_are_left_alone() {
        let mut recovery = MaxTokensRecovery::new(2);
        let mut history = Vec::new();
        let sink = RecordingSink::default();
        let outcome = recovery.handle(
            "t1",
            &ModelResponse {
                stop_reason: StopReason::EndTurn,
                content: vec![],
                usage: None,
            },
            &mut history,
            &sink,
        );
        assert_eq!(outcome, RecoveryOutcome::NotTruncated);
        assert!(history.is_empty());
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn retry_appends_partial_text_and_continuation_instruction() {
        let mut recovery = MaxTokensRecovery::new(2);
        let mut history = Vec::new();
        let sink = RecordingSink::default();
        let outcome = recovery.handle("t1", &truncated(Some("half an ans")), &mut history, &sink);
        assert_eq!(outcome, RecoveryOutcome::Retry);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].joined_text(), "half an ans");
        assert!(history[1].joined_text().contains("smaller tool calls"));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn placeholder_is_used_when_no_text_blocks_exist() {
        let mut recovery = MaxTokensRecovery::new(2);
        let mut history = Vec::new();
        let sink = RecordingSink::default();
        recovery.handle("t1", &truncated(None), &mut history, &sink);
        assert_eq!(history[0].joined_text(), CONTINUATION_PLACEHOLDER);
    }

    #[test]
    fn exhausts_after_the_configured_maximum_and_keeps_emitting_events() {
        let mut recovery = MaxTokensRecovery::new(2);
        let mut history = Vec::new();
        let sink = RecordingSink::default();
        assert_eq!(
            recovery.handle("t1", &truncated(Some("a")), &mut history, &sink),
            RecoveryOutcome::Retry
        );
        assert_eq!(
            recovery.handle("t1", &truncated(Some("b")), &mut history, &sink),
            RecoveryOutcome::Retry
        );
        assert_eq!(
            recovery.handle("t1", &truncated(Some("c")), &mut history, &sink),
            RecoveryOutcome::Exhausted
        );
        // Exhaustion appends only the partial text, no further instruction.
        assert_eq!(history.len(), 5);
        assert_eq!(history[4].joined_text(), "c");
        assert_eq!(sink.0.lock().unwrap().len(), 3);
    }
}
