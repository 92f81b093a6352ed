use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::error::{MeetprepError, Result};
use crate::llm::{CompletionOptions, LanguageModel};
use crate::message::Message;
use crate::tool::ToolRegistry;

pub const DEFAULT_MAX_STEPS: usize = 6;

/// Static description of one pipeline participant.
#[derive(Clone)]
pub struct AgentProfile {
    pub key: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub temperature: f32,
    pub tools: ToolRegistry,
}

impl AgentProfile {
    pub fn new(
        key: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            temperature: 0.7,
            tools: ToolRegistry::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role, self.backstory, self.goal
        )
    }
}

/// Public view of a profile, without its tool handles.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub key: String,
    pub role: String,
    pub goal: String,
    pub tools: Vec<String>,
}

impl From<&AgentProfile> for AgentSummary {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            key: profile.key.clone(),
            role: profile.role.clone(),
            goal: profile.goal.clone(),
            tools: profile.tools.names(),
        }
    }
}

/// What a finished exchange produced.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub content: String,
    pub tools_used: Vec<String>,
    pub transcript: Vec<Message>,
}

/// Runs a profile against a language model, executing requested tool calls
/// until the model answers with plain content.
pub struct Agent {
    profile: AgentProfile,
    model: Arc<dyn LanguageModel>,
    max_steps: usize,
}

impl Agent {
    pub fn new(profile: AgentProfile, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            profile,
            model,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Run one templated task. `context` holds the outputs of earlier tasks.
    #[tracing::instrument(name = "agent_task", skip_all, fields(agent = %self.profile.key))]
    pub async fn run_task(
        &self,
        description: &str,
        expected_output: &str,
        context: &[String],
    ) -> Result<AgentRun> {
        let mut prompt = format!(
            "{}\n\nThis is the expected criteria for your final answer: {}\n\
             You MUST return the actual complete content as the final answer, not a summary.",
            description.trim(),
            expected_output.trim()
        );
        if !context.is_empty() {
            prompt.push_str("\n\nThis is the context you're working with:\n");
            prompt.push_str(&context.join("\n\n----------\n\n"));
        }

        self.converse(vec![
            Message::system(self.profile.system_prompt()),
            Message::user(prompt),
        ])
        .await
    }

    /// Continue a transcript until the model produces a final answer.
    pub async fn converse(&self, mut transcript: Vec<Message>) -> Result<AgentRun> {
        let tools = self.profile.tools.describe();
        let options = CompletionOptions::with_temperature(self.profile.temperature);
        let mut tools_used = Vec::new();

        for step in 0..self.max_steps {
            let completion = self.model.complete_chat(&transcript, &tools, options).await?;

            if completion.tool_calls.is_empty() {
                let content = completion.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(MeetprepError::Protocol(format!(
                        "agent `{}` returned an empty answer",
                        self.profile.key
                    )));
                }
                transcript.push(Message::assistant(content.clone()));
                tracing::debug!(step, tools = tools_used.len(), "agent finished");
                return Ok(AgentRun {
                    content,
                    tools_used,
                    transcript,
                });
            }

            let calls = completion.tool_calls;
            transcript.push(Message::assistant_calls(completion.content, calls.clone()));
            for call in &calls {
                tracing::info!(tool = %call.name, "calling tool");
                tools_used.push(call.name.clone());
                let output = match self.profile.tools.call(&call.name, call.arguments.clone()).await {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(tool = %call.name, error = %err, "tool call failed");
                        json!({ "error": err.to_string() })
                    }
                };
                transcript.push(Message::tool(call, output));
            }
        }

        Err(MeetprepError::Protocol(format!(
            "agent `{}` reached the step limit of {} without a final answer",
            self.profile.key, self.max_steps
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::llm::StubModel;
    use crate::message::Role;
    use crate::tool::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` field back"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    fn profile_with_echo() -> AgentProfile {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        AgentProfile::new("analyst", "an analyst", "analyse things", "You are careful.")
            .with_tools(tools)
    }

    #[tokio::test]
    async fn answers_without_tools() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"Hello!"}"#.into()]);
        let agent = Agent::new(profile_with_echo(), model.clone());

        let run = agent.run_task("Say hello", "A greeting", &[]).await.unwrap();

        assert_eq!(run.content, "Hello!");
        assert!(run.tools_used.is_empty());
        let sent = &model.requests()[0];
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("analyse things"));
        assert!(sent[1].content.contains("expected criteria for your final answer: A greeting"));
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"text":"ping"}}"#.into(),
            r#"{"action":"respond","content":"Echoed your request."}"#.into(),
        ]);
        let agent = Agent::new(profile_with_echo(), model.clone());

        let run = agent
            .run_task("Echo ping", "The echo", &["earlier findings".to_string()])
            .await
            .unwrap();

        assert_eq!(run.content, "Echoed your request.");
        assert_eq!(run.tools_used, vec!["echo".to_string()]);
        // system, user, assistant call, tool result, final answer
        assert_eq!(run.transcript.len(), 5);
        let second_request = &model.requests()[1];
        let tool_msg = second_request.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_result.as_ref().unwrap().output, json!({"text": "ping"}));
        assert!(second_request[1].content.contains("earlier findings"));
    }

    #[tokio::test]
    async fn tool_errors_are_reported_back_to_the_model() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"missing","arguments":{}}"#.into(),
            r#"{"action":"respond","content":"recovered"}"#.into(),
        ]);
        let agent = Agent::new(profile_with_echo(), model.clone());

        let run = agent.run_task("Try", "Anything", &[]).await.unwrap();

        assert_eq!(run.content, "recovered");
        let result = model.requests()[1].last().unwrap().tool_result.clone().unwrap();
        assert!(result.output["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn step_limit_is_a_protocol_error() {
        let model = StubModel::new(Vec::new())
            .with_fallback(r#"{"action":"call_tool","name":"echo","arguments":{}}"#);
        let agent = Agent::new(profile_with_echo(), model.clone()).with_max_steps(3);

        let err = agent.run_task("Loop", "Never", &[]).await.unwrap_err();

        assert!(matches!(err, MeetprepError::Protocol(_)));
        assert_eq!(model.requests().len(), 3);
    }

    #[tokio::test]
    async fn empty_answer_is_rejected() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"  "}"#.into()]);
        let agent = Agent::new(profile_with_echo(), model);

        assert!(agent.run_task("Blank", "Nothing", &[]).await.is_err());
    }
}
