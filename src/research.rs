use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agent::{Agent, AgentProfile};
use crate::config::AppConfig;
use crate::error::{MeetprepError, Result};
use crate::llm::{build_model, LanguageModel};
use crate::message::Message;
use crate::tool::ToolRegistry;
use crate::tools::{notes_toolkit, NoteStore, SaveTextTool, WikipediaSearchTool};

/// Structured answer the research assistant must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

const INSTRUCTIONS: &str = r#"You are a research assistant that helps produce a research paper.

How to use the tools:
- save_info needs a key and a value, e.g. save_info(key="name", value="Toan")
- load_info needs a key, e.g. load_info(key="name")
- list_info takes no arguments

Answer the user's query and use the tools you need.
Wrap the output in this format and provide no other text:
{"topic": string, "summary": string, "sources": [string], "tools_used": [string]}"#;

/// Remove a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_response(raw: &str) -> Result<ResearchResponse> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|err| {
        MeetprepError::Protocol(format!("could not parse research response ({err}): {raw}"))
    })
}

/// Chat assistant that keeps the conversation between questions.
pub struct ResearchAssistant {
    agent: Agent,
    history: Mutex<Vec<Message>>,
}

impl ResearchAssistant {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, max_steps: usize) -> Self {
        let profile = AgentProfile::new(
            "research_assistant",
            "a research assistant",
            "Answer research questions with sourced, structured summaries",
            "",
        )
        .with_tools(tools);
        Self {
            agent: Agent::new(profile, model).with_max_steps(max_steps),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = build_model(&cfg.model)?;
        let mut tools = notes_toolkit(NoteStore::new(&cfg.pipeline.notes_path));
        tools.register(WikipediaSearchTool::new(cfg.search.wikipedia_endpoint.clone()));
        tools.register(SaveTextTool::new(&cfg.pipeline.research_output));
        Ok(Self::new(model, tools, cfg.pipeline.max_steps))
    }

    pub async fn ask(&self, query: &str) -> Result<ResearchResponse> {
        let mut history = self.history.lock().await;
        let mut transcript = Vec::with_capacity(history.len() + 2);
        transcript.push(Message::system(INSTRUCTIONS));
        transcript.extend(history.iter().cloned());
        transcript.push(Message::user(query));

        let run = self.agent.converse(transcript).await?;
        history.push(Message::user(query));
        history.push(Message::assistant(run.content.clone()));

        let mut response = parse_response(&run.content)?;
        if response.tools_used.is_empty() {
            for name in run.tools_used {
                if !response.tools_used.contains(&name) {
                    response.tools_used.push(name);
                }
            }
        }
        Ok(response)
    }

    pub async fn reset(&self) {
        self.history.lock().await.clear();
    }
}
