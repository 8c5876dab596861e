//! Shared test doubles for executor integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use steward::events::ExecutorEvent;
use steward::traits::{
    ComplianceChecker, ComplianceVerdict, DuplicateCheck, DuplicateChecker, EventSink,
    ModelClient, ModelRequest, ModelResponse, TokenUsage, ToolCall, ToolRunner, UsageTracker,
};

/// Replays a fixed sequence of model responses, recording what each call
/// saw as the trailing conversation message.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    trailing_texts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            trailing_texts: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_calls(&self) -> usize {
        self.trailing_texts.lock().unwrap().len()
    }

    /// Joined text of the last conversation message per call, in order.
    pub fn trailing_texts(&self) -> Vec<String> {
        self.trailing_texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn call_with_retry(&self, request: ModelRequest<'_>) -> anyhow::Result<ModelResponse> {
        let trailing = request
            .messages
            .last()
            .map(|m| m.joined_text())
            .unwrap_or_default();
        self.trailing_texts.lock().unwrap().push(trailing);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted model ran out of responses"))
    }
}

#[derive(Default)]
pub struct NoopTracker;

impl UsageTracker for NoopTracker {
    fn record_usage(&self, _usage: &TokenUsage) {}
}

/// Serves canned tool outputs and records created files and invocations.
#[derive(Default)]
pub struct StaticToolRunner {
    outputs: HashMap<String, String>,
    created: Mutex<Vec<String>>,
    invocations: Mutex<usize>,
}

impl StaticToolRunner {
    pub fn with_output(mut self, tool: &str, output: &str) -> Self {
        self.outputs.insert(tool.to_string(), output.to_string());
        self
    }

    pub fn with_created_file(self, path: &str) -> Self {
        self.created.lock().unwrap().push(path.to_string());
        self
    }

    pub fn invocations(&self) -> usize {
        *self.invocations.lock().unwrap()
    }
}

#[async_trait]
impl ToolRunner for StaticToolRunner {
    async fn run_tool(&self, call: &ToolCall) -> anyhow::Result<String> {
        *self.invocations.lock().unwrap() += 1;
        self.outputs
            .get(&call.name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("tool '{}' is not available", call.name))
    }

    async fn created_files(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

/// Always reports fresh calls.
#[derive(Default)]
pub struct FreshDuplicates;

#[async_trait]
impl DuplicateChecker for FreshDuplicates {
    async fn check(&self, _tool: &str, _input: &Value) -> DuplicateCheck {
        DuplicateCheck::Fresh
    }

    async fn record(&self, _tool: &str, _input: &Value, _result: &str) {}
}

#[derive(Default)]
pub struct NoopCompliance;

impl ComplianceChecker for NoopCompliance {
    fn check_output(&self, _text: &str) -> ComplianceVerdict {
        ComplianceVerdict::default()
    }
}

#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<ExecutorEvent>>);

impl EventSink for RecordingSink {
    fn emit(&self, event: ExecutorEvent) {
        self.0.lock().unwrap().push(event);
    }
}
