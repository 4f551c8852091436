//! Reasoning service contract and its GraphQL workflow client.
//!
//! The service is an unreliable, at-least-once-callable black box: replies
//! are loosely-typed JSON and are decoded by [`crate::extract`].

use std::time::Duration;

use async_trait::async_trait;
use netguide_core::config::ServiceConfig;
use netguide_core::types::{ChatMessage, QnaPair};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AssessmentError;

const EXECUTE_WORKFLOW_QUERY: &str = "query ExecuteWorkflow($workflowId: String!, $input: JSON) {
  executeWorkflow(workflowId: $workflowId, payload: { input: $input }) {
    status
    result
  }
}";

/// Whether the service should produce another question or the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Ongoing,
    Done,
}

/// Full conversation state sent with every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub status: TurnStatus,
    pub chat: String,
    pub assessment: Vec<QnaPair>,
}

/// External question/analysis/report producer.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Ask for the next question (`ongoing`) or the analysis (`done`).
    async fn next_turn(&self, request: &TurnRequest) -> Result<Value, AssessmentError>;

    /// Ask for the report document of a completed session.
    async fn fetch_report(&self, session_id: Uuid) -> Result<Value, AssessmentError>;
}

/// Intake chat request: the whole conversation so far plus the user's role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'a str>,
}

/// Free-form chat that precedes the assessment.
#[async_trait]
pub trait IntakeService: Send + Sync {
    /// Send the conversation and return the assistant's reply text.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        role: Option<&str>,
    ) -> Result<String, AssessmentError>;
}

/// [`ReasoningService`] and [`IntakeService`] backed by a GraphQL workflow
/// executor.
#[derive(Clone)]
pub struct WorkflowClient {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    api_key: Option<String>,
    chatbot_workflow_id: String,
    assessment_workflow_id: String,
    report_workflow_id: String,
}

impl std::fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowClient")
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl WorkflowClient {
    /// Build a client from configuration, reading the bearer key from the
    /// environment variable named by `api_key_env`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, AssessmentError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "No API key in environment; workflow requests will be unauthenticated"
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &ServiceConfig,
        api_key: Option<String>,
    ) -> Result<Self, AssessmentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                AssessmentError::ServiceUnreachable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            project_id: config.project_id.clone(),
            api_key,
            chatbot_workflow_id: config.chatbot_workflow_id.clone(),
            assessment_workflow_id: config.assessment_workflow_id.clone(),
            report_workflow_id: config.report_workflow_id.clone(),
        })
    }

    /// Whether an intake chat workflow is configured.
    pub fn has_intake(&self) -> bool {
        !self.chatbot_workflow_id.trim().is_empty()
    }

    async fn execute(&self, workflow_id: &str, input: Value) -> Result<Value, AssessmentError> {
        let body = json!({
            "query": EXECUTE_WORKFLOW_QUERY,
            "variables": {
                "workflowId": workflow_id,
                "input": input,
            }
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .header("x-project-id", self.project_id.as_str())
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssessmentError::ServiceUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AssessmentError::ServiceUnreachable(format!(
                "HTTP {}: {}",
                status, text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssessmentError::MalformedResponse(e.to_string()))?;
        debug!(workflow_id, "Workflow response received");
        interpret_response(payload)
    }
}

#[async_trait]
impl ReasoningService for WorkflowClient {
    async fn next_turn(&self, request: &TurnRequest) -> Result<Value, AssessmentError> {
        let input = serde_json::to_value(request)
            .map_err(|e| AssessmentError::MalformedResponse(e.to_string()))?;
        self.execute(&self.assessment_workflow_id, input).await
    }

    async fn fetch_report(&self, session_id: Uuid) -> Result<Value, AssessmentError> {
        self.execute(
            &self.report_workflow_id,
            json!({ "session_id": session_id.to_string() }),
        )
        .await
    }
}

#[async_trait]
impl IntakeService for WorkflowClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        role: Option<&str>,
    ) -> Result<String, AssessmentError> {
        let input = serde_json::to_value(ChatRequest { messages, role })
            .map_err(|e| AssessmentError::MalformedResponse(e.to_string()))?;
        let reply = self.execute(&self.chatbot_workflow_id, input).await?;
        let text = chat_reply_text(&reply);
        if text.trim().is_empty() {
            return Err(AssessmentError::MalformedResponse(
                "empty chat reply".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Reply text of the intake chat workflow.
///
/// Looked up as `output` (a string, with literal `\n` sequences turned into
/// newlines), then `output.generatedResponse`, then `generatedResponse`. A
/// plain string reply is returned as is; anything else is rendered as JSON.
pub fn chat_reply_text(reply: &Value) -> String {
    fn text_of(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
    fn present(value: Option<&Value>) -> Option<&Value> {
        value.filter(|v| match v {
            Value::Null | Value::Bool(false) => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
    }

    if let Some(output) = present(reply.get("output")) {
        if let Some(text) = output.as_str() {
            return text.replace("\\n", "\n");
        }
        if let Some(generated) = present(output.get("generatedResponse")) {
            return text_of(generated);
        }
    }
    if let Some(generated) = present(reply.get("generatedResponse")) {
        return text_of(generated);
    }
    text_of(reply)
}

/// Unwrap a GraphQL `executeWorkflow` envelope into its `result`.
///
/// A string result is parsed as JSON when possible, otherwise passed through
/// as a JSON string.
pub fn interpret_response(payload: Value) -> Result<Value, AssessmentError> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let message = first
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown workflow error");
            return Err(AssessmentError::ServiceError(message.to_string()));
        }
    }

    match payload.pointer("/data/executeWorkflow/result") {
        None | Some(Value::Null) => Err(AssessmentError::MalformedResponse(
            "no result in workflow response".to_string(),
        )),
        Some(Value::String(s)) if s.is_empty() => Err(AssessmentError::MalformedResponse(
            "empty result in workflow response".to_string(),
        )),
        Some(Value::String(s)) => {
            Ok(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
        }
        Some(other) => Ok(other.clone()),
    }
}
