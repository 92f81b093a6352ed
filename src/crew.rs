//! The four-stage meeting preparation pipeline.
//!
//! Each stage is a prompt template bound to one agent profile. Stages run
//! strictly in order on a [`Workflow`], and every stage sees the outputs of
//! all earlier stages as context. Progress is published as
//! [`PipelineEvent`]s on a broadcast channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agent::{Agent, AgentProfile, AgentSummary};
use crate::config::{AppConfig, MeetingLimits, PipelineConfig};
use crate::error::Result;
use crate::llm::{build_model, LanguageModel};
use crate::meeting::MeetingRequest;
use crate::metrics::PipelineMetrics;
use crate::tool::ToolRegistry;
use crate::tools::SerperSearchTool;
use crate::workflow::{StepObserver, Workflow, WorkflowContext, WorkflowTask};

const EVENT_BUFFER: usize = 256;
const TOOL_CALLS_KEY: &str = "tool_calls";

/// A prompt template bound to the agent that executes it.
#[derive(Debug, Clone, Copy)]
pub struct TaskTemplate {
    pub key: &'static str,
    pub title: &'static str,
    pub agent: &'static str,
    pub description: &'static str,
    pub expected_output: &'static str,
}

pub const TASKS: [TaskTemplate; 4] = [
    TaskTemplate {
        key: "context_analysis",
        title: "Context analysis",
        agent: "context_analyzer",
        description: r#"IMPORTANT: write your entire answer in {language}.

Analyze the context of the meeting with {company_name}, considering:
1. Meeting objective: {meeting_objective}
2. Attendees: {attendees}
3. Meeting duration: {meeting_duration} minutes
4. Focus areas or specific concerns: {focus_areas}

Research {company_name} thoroughly, including:
1. Recent news and press releases
2. Key products or services
3. Major competitors

Provide a comprehensive summary of your findings, highlighting the information most relevant to the meeting context.
Format your output in markdown with appropriate headings and subheadings."#,
        expected_output: "A detailed analysis of the meeting context and company background, including recent developments, financial performance and relevance to the meeting objective, formatted in markdown with headings and subheadings.",
    },
    TaskTemplate {
        key: "industry_analysis",
        title: "Industry analysis",
        agent: "industry_insights_generator",
        description: r#"IMPORTANT: write your entire answer in {language}.

Based on the context analysis for {company_name} and the meeting objective: {meeting_objective}, provide an in-depth industry analysis:
1. Identify key trends and developments in the industry
2. Analyze the competitive landscape
3. Highlight potential opportunities and threats
4. Provide insight into market positioning

Make sure the analysis fits the meeting objective and the attendees' roles.
Format your output in markdown with appropriate headings and subheadings."#,
        expected_output: "A comprehensive industry analysis report covering trends, competitive landscape, opportunities, threats and insights relevant to the meeting objective, formatted in markdown with headings and subheadings.",
    },
    TaskTemplate {
        key: "strategy_development",
        title: "Meeting strategy",
        agent: "strategy_formulator",
        description: r#"IMPORTANT: write your entire answer in {language}.

Using the context analysis and industry insights, develop a tailored meeting strategy and detailed agenda for the {meeting_duration}-minute meeting with {company_name}. Include:
1. A time-boxed agenda with clear objectives for each section
2. Key talking points for each agenda item
3. Suggested speakers or leads for each section
4. Potential discussion topics and questions to drive the conversation
5. Strategies to address the focus areas and specific concerns: {focus_areas}

Make sure the strategy and agenda serve the meeting objective: {meeting_objective}
Format your output in markdown with appropriate headings and subheadings."#,
        expected_output: "A detailed meeting strategy and time-boxed agenda, including objectives, key talking points and strategies for the specific focus areas, formatted in markdown with headings and subheadings.",
    },
    TaskTemplate {
        key: "executive_brief",
        title: "Executive brief",
        agent: "executive_briefing_creator",
        description: r#"IMPORTANT: write your entire answer in {language}.

Synthesize all gathered information into a comprehensive yet concise executive brief for the meeting with {company_name}. Produce:

1. A detailed one-page executive summary containing:
    - A clear statement of the meeting objective
    - The key attendees and their roles
    - Critical background on {company_name} and the relevant industry context
    - The top 3-5 strategic goals for the meeting, aligned with the objective
    - A short overview of the meeting structure and main topics

2. A detailed list of key talking points, each supported by:
    - Relevant data or statistics
    - Specific examples or case studies
    - Links to the company's current situation or challenges

3. Anticipated questions and prepared answers:
    - Likely questions from attendees given their roles and the meeting objective
    - Thoughtful, data-driven answers to each
    - Any supporting information or extra context that may be needed

4. Strategic recommendations and next steps:
    - 3-5 actionable recommendations based on the analysis
    - Clear next steps for implementation or follow-up
    - Suggested timelines or deadlines for key actions
    - Potential obstacles and mitigation strategies

Keep the brief comprehensive yet concise, highly actionable and precisely aligned with the meeting objective: {meeting_objective}. Structure it for quick navigation during the meeting.
Format your output in markdown with suitable subheadings and a plain, unstyled title on the first line."#,
        expected_output: "A comprehensive executive brief with summary, key talking points, Q&A preparation and strategic recommendations, formatted in markdown with H1 title, H2 sections and H3 subsections where appropriate. Use bullet points, numbered lists and bold or italic emphasis for key information.",
    },
];

/// Substitute the meeting placeholders in a template in a single pass, so
/// braces inside the request values are copied through untouched. Unknown
/// `{tokens}` are kept as written.
pub fn render(template: &str, request: &MeetingRequest, language: &str) -> String {
    let duration = request.meeting_duration.to_string();
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let token = after.find('}').and_then(|close| {
            placeholder(&after[..close], request, &duration, language).map(|value| (close, value))
        });
        match token {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder<'a>(
    name: &str,
    request: &'a MeetingRequest,
    duration: &'a str,
    language: &'a str,
) -> Option<&'a str> {
    match name {
        "company_name" => Some(request.company_name.trim()),
        "meeting_objective" => Some(request.meeting_objective.trim()),
        "attendees" => Some(request.attendees.trim()),
        "meeting_duration" => Some(duration),
        "focus_areas" => Some(request.focus_areas.trim()),
        "language" => Some(language),
        _ => None,
    }
}

/// The four fixed agent profiles. `search` is handed to the two research
/// agents.
pub fn default_profiles(search: &ToolRegistry) -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(
            "context_analyzer",
            "Meeting context analysis specialist",
            "Analyze and summarize the key background information for the meeting",
            "You quickly understand complex business contexts and identify the information that matters.",
        )
        .with_tools(search.clone()),
        AgentProfile::new(
            "industry_insights_generator",
            "Industry expert",
            "Provide in-depth industry analysis and identify key trends",
            "You are a seasoned industry analyst with a knack for spotting emerging trends and opportunities.",
        )
        .with_tools(search.clone()),
        AgentProfile::new(
            "strategy_formulator",
            "Meeting strategy specialist",
            "Develop a tailored meeting strategy and a detailed agenda",
            "You are a master meeting planner, known for highly effective strategies and agendas.",
        ),
        AgentProfile::new(
            "executive_briefing_creator",
            "Communications specialist",
            "Synthesize information into concise, impactful briefs",
            "You are a communications expert, skilled at distilling complex information into clear, actionable insights.",
        ),
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        run_id: Uuid,
        index: usize,
        total: usize,
        stage: String,
        title: String,
    },
    StageCompleted {
        run_id: Uuid,
        index: usize,
        total: usize,
        stage: String,
        chars: usize,
    },
    Finished {
        run_id: Uuid,
        duration_ms: u64,
        tool_calls: usize,
    },
    Failed {
        run_id: Uuid,
        stage: Option<String>,
        error: String,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::Finished { run_id, .. }
            | PipelineEvent::Failed { run_id, .. } => *run_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub key: String,
    pub title: String,
    pub agent: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrewOutput {
    pub run_id: Uuid,
    pub final_output: String,
    pub stages: Vec<StageResult>,
    pub tool_calls: usize,
    pub duration: Duration,
}

struct AgentStep {
    template: TaskTemplate,
    agent: Arc<Agent>,
    request: MeetingRequest,
    language: String,
}

#[async_trait]
impl WorkflowTask for AgentStep {
    fn key(&self) -> &str {
        self.template.key
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> Result<Value> {
        let context: Vec<String> = ctx
            .outputs
            .iter()
            .filter_map(|out| out.value.as_str().map(str::to_string))
            .collect();
        let run = self
            .agent
            .run_task(
                &render(self.template.description, &self.request, &self.language),
                self.template.expected_output,
                &context,
            )
            .await?;
        ctx.increment(TOOL_CALLS_KEY, run.tools_used.len() as u64);
        Ok(Value::String(run.content))
    }
}

struct EventObserver {
    run_id: Uuid,
    sender: broadcast::Sender<PipelineEvent>,
}

impl StepObserver for EventObserver {
    fn step_started(&self, index: usize, total: usize, key: &str) {
        tracing::info!(run_id = %self.run_id, stage = key, "{}/{} started", index + 1, total);
        let _ = self.sender.send(PipelineEvent::StageStarted {
            run_id: self.run_id,
            index,
            total,
            stage: key.to_string(),
            title: stage_title(key).to_string(),
        });
    }

    fn step_finished(&self, index: usize, total: usize, key: &str, output: &Value) {
        let chars = output.as_str().map_or(0, |text| text.chars().count());
        let _ = self.sender.send(PipelineEvent::StageCompleted {
            run_id: self.run_id,
            index,
            total,
            stage: key.to_string(),
            chars,
        });
    }
}

fn stage_title(key: &str) -> &'static str {
    TASKS
        .iter()
        .find(|task| task.key == key)
        .map_or("", |task| task.title)
}

pub struct MeetingCrew {
    agents: Vec<Arc<Agent>>,
    language: String,
    limits: MeetingLimits,
    events: broadcast::Sender<PipelineEvent>,
    metrics: PipelineMetrics,
}

impl MeetingCrew {
    pub fn new(model: Arc<dyn LanguageModel>, search: ToolRegistry, pipeline: &PipelineConfig) -> Self {
        let agents = default_profiles(&search)
            .into_iter()
            .map(|profile| {
                Arc::new(Agent::new(profile, model.clone()).with_max_steps(pipeline.max_steps))
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            agents,
            language: pipeline.language.clone(),
            limits: MeetingLimits::default(),
            events,
            metrics: PipelineMetrics::default(),
        }
    }

    /// Build the crew from configuration. Without a Serper key the research
    /// agents run without web search.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model = build_model(&cfg.model)?;
        let mut search = ToolRegistry::new();
        match SerperSearchTool::from_config(&cfg.search) {
            Ok(tool) => search.register(tool),
            Err(err) => tracing::warn!(error = %err, "web search disabled"),
        }
        Ok(Self::new(model, search, &cfg.pipeline).with_limits(cfg.meeting.clone()))
    }

    pub fn with_limits(mut self, limits: MeetingLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<PipelineEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn agents(&self) -> Vec<AgentSummary> {
        self.agents
            .iter()
            .map(|agent| AgentSummary::from(agent.profile()))
            .collect()
    }

    fn agent_for(&self, key: &str) -> Option<Arc<Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.profile().key == key)
            .cloned()
    }

    fn workflow_for(&self, request: &MeetingRequest) -> Workflow {
        TASKS
            .iter()
            .filter_map(|template| {
                let agent = self.agent_for(template.agent)?;
                Some(Arc::new(AgentStep {
                    template: *template,
                    agent,
                    request: request.clone(),
                    language: self.language.clone(),
                }) as Arc<dyn WorkflowTask>)
            })
            .fold(Workflow::new("meeting_preparation"), Workflow::then)
    }

    pub async fn kickoff(&self, request: &MeetingRequest) -> Result<CrewOutput> {
        self.kickoff_as(Uuid::new_v4(), request).await
    }

    /// Run the pipeline, tagging every event with `run_id`.
    pub async fn kickoff_as(&self, run_id: Uuid, request: &MeetingRequest) -> Result<CrewOutput> {
        request.validate(&self.limits)?;

        let started = Instant::now();
        let mut guard = self.metrics.start_run(request.company_name.trim());
        let workflow = self.workflow_for(request);
        let observer = EventObserver {
            run_id,
            sender: self.events.clone(),
        };
        let mut ctx = WorkflowContext::default();

        tracing::info!(%run_id, company = %request.company_name.trim(), "meeting preparation started");
        let outcome = workflow.run(&mut ctx, &observer).await;
        let tool_calls = ctx
            .get(TOOL_CALLS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        guard.record_tool_calls(tool_calls);

        let final_output = match outcome {
            Ok(value) => value.as_str().unwrap_or_default().to_string(),
            Err(err) => {
                let stage = TASKS.get(ctx.outputs.len()).map(|task| task.key.to_string());
                tracing::error!(%run_id, stage = ?stage, error = %err, "meeting preparation failed");
                let _ = self.events.send(PipelineEvent::Failed {
                    run_id,
                    stage,
                    error: err.to_string(),
                });
                guard.finish(false);
                return Err(err);
            }
        };
        guard.finish(true);

        let duration = started.elapsed();
        let _ = self.events.send(PipelineEvent::Finished {
            run_id,
            duration_ms: duration.as_millis() as u64,
            tool_calls,
        });
        tracing::info!(%run_id, elapsed_ms = duration.as_millis() as u64, "meeting preparation finished");

        let stages = ctx
            .outputs
            .iter()
            .zip(TASKS.iter())
            .map(|(out, task)| StageResult {
                key: task.key.to_string(),
                title: task.title.to_string(),
                agent: task.agent.to_string(),
                output: out.value.as_str().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(CrewOutput {
            run_id,
            final_output,
            stages,
            tool_calls,
            duration,
        })
    }
}
