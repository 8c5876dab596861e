//! End-to-end executor loop tests with scripted model turns.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{FreshDuplicates, NoopCompliance, NoopTracker, RecordingSink, ScriptedModel, StaticToolRunner};
use steward::config::ExecutorConfig;
use steward::executor::{BudgetedModelCall, CancelSignal, TaskExecutor, TaskOutcome, TaskSpec};
use steward::traits::{ContentBlock, ModelResponse, StopReason, TaskDomain};

fn tool_turn(id: &str, name: &str, input: serde_json::Value) -> ModelResponse {
    ModelResponse {
        stop_reason: StopReason::ToolUse,
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        usage: None,
    }
}

fn text_turn(text: &str) -> ModelResponse {
    ModelResponse {
        stop_reason: StopReason::EndTurn,
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        usage: None,
    }
}

fn executor(
    responses: Vec<ModelResponse>,
    tools: StaticToolRunner,
    sink: Arc<RecordingSink>,
) -> TaskExecutor {
    let model = BudgetedModelCall::new(
        Arc::new(ScriptedModel::new(responses)),
        Arc::new(NoopTracker),
        None,
        None,
    );
    TaskExecutor::new(
        ExecutorConfig::default(),
        model,
        Arc::new(tools),
        Arc::new(FreshDuplicates),
        Arc::new(NoopCompliance),
        sink,
    )
}

fn spec(title: &str, prompt: &str, domain: TaskDomain) -> TaskSpec {
    TaskSpec {
        id: "task-1".into(),
        title: title.into(),
        prompt: prompt.into(),
        domain,
        execution_mode: None,
        conversation_mode_hint: None,
        requires_direct_answer: false,
        requires_decision_signal: false,
        tool_names: vec!["read_file".into()],
        tool_schemas: vec![json!({"name": "read_file", "input_schema": {}})],
        system_prompt: "You are a task runner.".into(),
        plan_steps: vec![],
    }
}

#[tokio::test]
async fn tool_turn_then_final_answer_succeeds() {
    let sink = Arc::new(RecordingSink::default());
    let answer = "The notes cover three incidents: a cache outage, a flaky deploy, and a \
                  follow-up migration that is still pending review.";
    let executor = executor(
        vec![
            tool_turn("tc_1", "read_file", json!({"path": "notes.md"})),
            text_turn(answer),
        ],
        StaticToolRunner::default().with_output("read_file", "incident notes"),
        sink.clone(),
    );

    let outcome = executor
        .run_task(
            &spec("Summarize notes", "Summarize the notes file", TaskDomain::General),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Success {
            text: answer.to_string()
        }
    );
    // The final answer surfaced as an assistant-message event.
    let events = sink.0.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| serde_json::to_value(e).unwrap()["event"] == "assistant_message"));
}

#[tokio::test]
async fn missing_artifact_fails_with_the_exact_reason() {
    let sink = Arc::new(RecordingSink::default());
    let executor = executor(
        vec![
            tool_turn("tc_1", "read_file", json!({"path": "meeting.md"})),
            text_turn("Report is done."),
        ],
        StaticToolRunner::default().with_output("read_file", "meeting transcript"),
        sink.clone(),
    );

    let outcome = executor
        .run_task(
            &spec(
                "Meeting report",
                "Write a PDF report summarizing the meeting",
                TaskDomain::Writing,
            ),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Failed {
            reason: "Task missing artifact evidence: expected an output file/document but no \
                     created file was detected."
                .to_string()
        }
    );
}

#[tokio::test]
async fn created_artifact_with_matching_extension_satisfies_the_contract() {
    let sink = Arc::new(RecordingSink::default());
    let summary = "Saved the meeting report. It covers the budget decision, two open risks, \
                   and the owners agreed for each follow-up item this quarter.";
    let executor = executor(
        vec![
            tool_turn("tc_1", "read_file", json!({"path": "meeting.md"})),
            text_turn(summary),
        ],
        StaticToolRunner::default()
            .with_output("read_file", "meeting transcript")
            .with_created_file("meeting-report.pdf"),
        sink.clone(),
    );

    let outcome = executor
        .run_task(
            &spec(
                "Meeting report",
                "Write a PDF report summarizing the meeting",
                TaskDomain::Writing,
            ),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Success { .. }));
}

#[tokio::test]
async fn best_effort_cancellation_without_output_still_fails_the_contract() {
    let sink = Arc::new(RecordingSink::default());
    let executor = executor(
        vec![text_turn("never reached")],
        StaticToolRunner::default(),
        sink.clone(),
    );

    let cancel = CancelSignal::new();
    cancel.cancel_best_effort();
    let task = spec("Log analysis", "Analyze the logs", TaskDomain::Research);
    let outcome = executor.run_task(&task, &cancel).await.unwrap();

    // Cancellation before the first model call leaves no candidate to
    // salvage, so adjudication runs normally and fails on execution evidence.
    match outcome {
        TaskOutcome::Failed { reason } => {
            assert!(reason.starts_with("Task missing execution evidence"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn max_tokens_turns_are_retried_then_recovered() {
    let sink = Arc::new(RecordingSink::default());
    let truncated = ModelResponse {
        stop_reason: StopReason::MaxTokens,
        content: vec![ContentBlock::Text {
            text: "The notes cover".to_string(),
        }],
        usage: None,
    };
    let answer = "The notes cover three incidents and one pending migration; details were \
                  captured from the incident files directly.";
    let executor = executor(
        vec![truncated, text_turn(answer)],
        StaticToolRunner::default().with_output("read_file", "incident notes"),
        sink.clone(),
    );

    let outcome = executor
        .run_task(
            &spec("Notes question", "What do the incident notes say?", TaskDomain::General),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Success { .. }));
    let events = sink.0.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| serde_json::to_value(e).unwrap()["event"] == "max_tokens_recovery"));
}

#[tokio::test]
async fn all_failed_turn_hint_reaches_the_model_on_the_next_call() {
    let sink = Arc::new(RecordingSink::default());
    let answer = "The incident notes list a cache outage and a flaky deploy; both were closed \
                  out last week according to the status log.";
    let client = Arc::new(ScriptedModel::new(vec![
        tool_turn("tc_1", "list_backups", json!({"path": "/srv"})),
        text_turn(answer),
    ]));
    let model = BudgetedModelCall::new(client.clone(), Arc::new(NoopTracker), None, None);
    let executor = TaskExecutor::new(
        ExecutorConfig::default(),
        model,
        Arc::new(StaticToolRunner::default()),
        Arc::new(FreshDuplicates),
        Arc::new(NoopCompliance),
        sink.clone(),
    );

    // The only scripted call targets a tool outside the offered list, so the
    // whole turn fails with an unavailable result.
    let outcome = executor
        .run_task(
            &spec("Notes question", "What do the incident notes say?", TaskDomain::General),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Success { .. }));
    // The recovery hint was queued and the model got another turn to act
    // on it.
    assert_eq!(client.seen_calls(), 2);
    let trailing = client.trailing_texts();
    assert!(trailing[1].contains("make your next turn count"));
    let events = sink.0.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| serde_json::to_value(e).unwrap()["event"] == "tool_recovery_prompted"));
}

#[tokio::test]
async fn question_turn_resolves_its_tool_calls_before_surfacing() {
    let sink = Arc::new(RecordingSink::default());
    let client = Arc::new(ScriptedModel::new(vec![ModelResponse {
        stop_reason: StopReason::ToolUse,
        content: vec![
            ContentBlock::Text {
                text: "I found the incident notes and an older summary draft. Should I \
                       include both sources in the answer?"
                    .to_string(),
            },
            ContentBlock::ToolUse {
                id: "tc_1".to_string(),
                name: "read_file".to_string(),
                input: json!({"path": "notes.md"}),
            },
        ],
        usage: None,
    }]));
    let runner = Arc::new(StaticToolRunner::default().with_output("read_file", "incident notes"));
    let model = BudgetedModelCall::new(client.clone(), Arc::new(NoopTracker), None, None);
    let executor = TaskExecutor::new(
        ExecutorConfig::default(),
        model,
        runner.clone(),
        Arc::new(FreshDuplicates),
        Arc::new(NoopCompliance),
        sink.clone(),
    );

    let outcome = executor
        .run_task(
            &spec("Notes question", "What do the incident notes say?", TaskDomain::General),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

    // The question ends the loop, but only after the turn's tool call got
    // its matching result.
    assert_eq!(runner.invocations(), 1);
    assert_eq!(client.seen_calls(), 1);
    assert!(matches!(outcome, TaskOutcome::Success { .. }));
}

#[tokio::test]
async fn analyze_mode_blocks_mutating_tools_before_dispatch() {
    let sink = Arc::new(RecordingSink::default());
    let executor = executor(
        vec![
            tool_turn("tc_1", "write_file", json!({"path": "a.md", "content": "x"})),
            text_turn(
                "I cannot write the draft in this mode, so here is the review inline: the \
                 numbers in section two are stale and the summary overstates the rollout.",
            ),
        ],
        StaticToolRunner::default().with_output("write_file", "should never run"),
        sink.clone(),
    );

    let mut task = spec("Review", "Review and summarize the draft", TaskDomain::Research);
    task.conversation_mode_hint = Some("chat".into());
    task.tool_names = vec!["write_file".into()];
    task.tool_schemas = vec![json!({"name": "write_file", "input_schema": {}})];

    let outcome = executor.run_task(&task, &CancelSignal::new()).await.unwrap();
    // The mutating call was denied, so no tool ever succeeded and the
    // contract fails on execution evidence.
    match outcome {
        TaskOutcome::Failed { reason } => {
            assert!(reason.starts_with("Task missing execution evidence"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
