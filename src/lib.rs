//! AI meeting preparation.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an OpenAI client.
//! - A tool interface (`Tool` and `ToolRegistry`) and the tools the agents use.
//! - An `Agent` that loops between the model and tools using native tool calls.
//! - `MeetingCrew`, the four-stage preparation pipeline, plus report storage,
//!   dashboard metrics, a research assistant, contacts import and mail.

pub mod agent;
pub mod config;
pub mod contacts;
pub mod crew;
pub mod dashboard;
pub mod error;
pub mod llm;
pub mod logging;
#[cfg(feature = "mail")]
pub mod mailer;
pub mod meeting;
pub mod message;
pub mod metrics;
pub mod reports;
pub mod research;
pub mod security;
#[cfg(feature = "server")]
pub mod server;
pub mod tool;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentProfile, AgentRun, AgentSummary};
pub use config::AppConfig;
pub use contacts::{Contact, ContactStats, PeopleClient};
pub use crew::{CrewOutput, MeetingCrew, PipelineEvent};
pub use dashboard::{DashboardMetrics, SystemHealth};
pub use error::{MeetprepError, Result};
pub use llm::{build_model, LanguageModel, StubModel};
#[cfg(feature = "mail")]
pub use mailer::{Mailer, SmtpMailer};
pub use meeting::{MeetingRequest, MeetingSummary};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use metrics::PipelineMetrics;
pub use reports::{ReportEntry, ReportStore};
pub use research::{ResearchAssistant, ResearchResponse};
pub use tool::{Tool, ToolRegistry};
pub use workflow::{Workflow, WorkflowContext, WorkflowTask};
