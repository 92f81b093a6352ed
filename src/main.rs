//! `meetprep` command line entry point.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use meetprep::config::AppConfig;
use meetprep::contacts::{self, ContactStats, PeopleClient};
use meetprep::crew::{MeetingCrew, PipelineEvent};
use meetprep::logging::init_default_logging;
use meetprep::meeting::MeetingRequest;
use meetprep::reports::ReportStore;
use meetprep::research::ResearchAssistant;
use meetprep::{MeetprepError, Result};

const DEFAULT_CONFIG: &str = "meetprep.toml";

/// AI meeting preparation: research, strategy and an executive brief.
#[derive(Parser)]
#[command(name = "meetprep")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MEETPREP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web dashboard
    #[cfg(feature = "server")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Prepare a meeting and save the report
    Prepare {
        #[arg(long)]
        company: String,
        #[arg(long)]
        objective: String,
        /// One attendee, e.g. "Jane Doe - CEO". Repeat for more.
        #[arg(long = "attendee", required = true)]
        attendees: Vec<String>,
        /// Duration in minutes; defaults to `meeting.default_duration`
        #[arg(long)]
        duration: Option<u32>,
        #[arg(long)]
        focus: String,
    },
    /// Ask the research assistant; starts an interactive session without a query
    Research { query: Option<String> },
    /// Import Google contacts
    Contacts {
        /// Write a JSON backup here (defaults to the configured path)
        #[arg(long)]
        backup: Option<PathBuf>,
    },
    /// Email a saved report
    #[cfg(feature = "mail")]
    Mail {
        /// Report file name
        #[arg(long)]
        report: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// List saved reports
    Reports {
        #[arg(long)]
        limit: Option<usize>,
        /// Delete reports beyond the configured number to keep
        #[arg(long)]
        clean: bool,
    },
    /// Inspect configuration
    Config {
        /// Show current configuration, secrets masked
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Prepare {
            company,
            objective,
            attendees,
            duration,
            focus,
        } => {
            let request = MeetingRequest {
                company_name: company,
                meeting_objective: objective,
                attendees: attendees.join("\n"),
                meeting_duration: duration.unwrap_or(config.meeting.default_duration),
                focus_areas: focus,
            };
            prepare(config, request).await
        }
        Commands::Research { query } => research(config, query).await,
        Commands::Contacts { backup } => import_contacts(config, backup).await,
        #[cfg(feature = "mail")]
        Commands::Mail { report, to, subject } => mail_report(config, report, to, subject).await,
        Commands::Reports { limit, clean } => list_reports(config, limit, clean).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            AppConfig::from_env_or_file(Some(path))
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            AppConfig::from_env_or_file(Some(Path::new(DEFAULT_CONFIG)))
        }
        None => AppConfig::from_env_or_file(None),
    }
}

#[cfg(feature = "server")]
async fn serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    use meetprep::server::{self, AppState};

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.ensure_directories()?;
    if let Err(e) = config.validate_api_keys() {
        tracing::warn!("{e}");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port)
        .parse::<std::net::SocketAddr>()
        .map_err(|e| MeetprepError::Config(format!("invalid listen address: {e}")))?;
    server::serve(AppState::from_config(config)?, addr).await
}

async fn prepare(config: AppConfig, request: MeetingRequest) -> Result<()> {
    request.validate(&config.meeting)?;
    let crew = MeetingCrew::from_config(&config)?;
    let mut events = crew.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::StageStarted { index, total, title, .. } => {
                    eprintln!("[{}/{}] {}...", index + 1, total, title);
                }
                PipelineEvent::Finished { .. } | PipelineEvent::Failed { .. } => break,
                PipelineEvent::StageCompleted { .. } => {}
            }
        }
    });

    let output = crew.kickoff(&request).await;
    progress.abort();
    let output = output?;

    let store = ReportStore::from_config(&config.reports);
    let entry = store.save(&output.final_output, &request.company_name).await?;
    store.clean_old(config.reports.keep_files).await?;

    println!("{}", output.final_output);
    println!();
    println!(
        "Report saved to {} ({:.1} min, {} tool calls)",
        store.dir().join(&entry.name).display(),
        output.duration.as_secs_f64() / 60.0,
        output.tool_calls
    );
    Ok(())
}

async fn research(config: AppConfig, query: Option<String>) -> Result<()> {
    let assistant = ResearchAssistant::from_config(&config)?;
    if let Some(query) = query {
        let response = assistant.ask(&query).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"What can I help you research? ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }
        match assistant.ask(query).await {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

async fn import_contacts(config: AppConfig, backup: Option<PathBuf>) -> Result<()> {
    let client = PeopleClient::from_config(&config.contacts)?;
    let list = client.list_contacts().await?;
    for contact in &list {
        println!("{}", contact.display_line());
    }

    let stats = ContactStats::from_contacts(&list);
    println!(
        "{} contacts, {} with a title, {} with labels",
        stats.total, stats.with_title, stats.with_labels
    );

    let path = backup.unwrap_or(config.contacts.backup_path);
    contacts::backup(&list, &path).await?;
    println!("Backup written to {}", path.display());
    Ok(())
}

#[cfg(feature = "mail")]
async fn mail_report(config: AppConfig, report: String, to: String, subject: Option<String>) -> Result<()> {
    use meetprep::mailer::{render_report_html, Mailer, SmtpMailer};

    let mailer = SmtpMailer::from_config(&config.smtp)?;
    let content = ReportStore::from_config(&config.reports).read(&report).await?;
    let subject = subject.unwrap_or_else(|| format!("Meeting preparation: {report}"));
    mailer
        .send_html(&to, &subject, &render_report_html(&subject, &content))
        .await?;
    println!("Sent {report} to {to}");
    Ok(())
}

async fn list_reports(config: AppConfig, limit: Option<usize>, clean: bool) -> Result<()> {
    let store = ReportStore::from_config(&config.reports);
    if clean {
        let removed = store.clean_old(config.reports.keep_files).await?;
        println!("Removed {removed} old report(s)");
    }
    let entries = store
        .recent(limit.unwrap_or(config.reports.history_len))
        .await?;
    if entries.is_empty() {
        println!("No meetings prepared yet");
    }
    for entry in entries {
        let when = entry
            .created
            .map(|created| created.format("%d/%m/%Y %H:%M").to_string())
            .unwrap_or_else(|| entry.modified.format("%d/%m/%Y %H:%M").to_string());
        println!("{}  {}  {}", when, entry.company, entry.name);
    }
    Ok(())
}

fn handle_config_command(config: AppConfig, show: bool) -> Result<()> {
    let missing = config.missing_api_keys();
    if show {
        println!("Current configuration:");
        let rendered = toml::to_string_pretty(&config.redacted())
            .map_err(|e| MeetprepError::Config(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }
    if missing.is_empty() {
        info!("Configuration validation complete");
    } else {
        tracing::warn!("missing API keys: {}", missing.join(", "));
    }
    Ok(())
}
