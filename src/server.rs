use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Local};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::agent::AgentSummary;
use crate::config::AppConfig;
use crate::crew::{MeetingCrew, PipelineEvent};
use crate::dashboard::{DashboardMetrics, SystemHealth};
use crate::error::{MeetprepError, Result};
use crate::meeting::MeetingRequest;
use crate::metrics::PipelineMetrics;
use crate::reports::ReportStore;
use crate::security::{log_security_event, RateLimiter};

#[cfg(feature = "mail")]
use crate::mailer::{render_report_html, Mailer, SmtpMailer};

const EVENT_BUFFER: usize = 512;
const MAX_JOBS: usize = 200;
const FINISHED_JOB_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running { stage: String },
    Completed { report: String },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub company: String,
    pub created_at: DateTime<Local>,
    #[serde(flatten)]
    pub status: JobStatus,
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    crew: Arc<MeetingCrew>,
    reports: ReportStore,
    metrics: PipelineMetrics,
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    events: broadcast::Sender<PipelineEvent>,
    limiter: Arc<RateLimiter>,
    #[cfg(feature = "mail")]
    mailer: Option<Arc<dyn Mailer>>,
}

impl AppState {
    /// Wire the crew to this state's event channel and metrics.
    pub fn new(config: AppConfig, crew: MeetingCrew) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let metrics = PipelineMetrics::default();
        let crew = crew
            .with_limits(config.meeting.clone())
            .with_events(events.clone())
            .with_metrics(metrics.clone());
        Self {
            reports: ReportStore::from_config(&config.reports),
            limiter: Arc::new(RateLimiter::new(
                config.security.rate_limit_requests,
                Duration::from_secs(config.security.rate_limit_window_secs),
            )),
            config: Arc::new(config),
            crew: Arc::new(crew),
            metrics,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            events,
            #[cfg(feature = "mail")]
            mailer: None,
        }
    }

    pub fn from_config(config: AppConfig) -> Result<Self> {
        let crew = MeetingCrew::from_config(&config)?;
        #[cfg(feature = "mail")]
        let mailer = match SmtpMailer::from_config(&config.smtp) {
            Ok(mailer) => Some(Arc::new(mailer) as Arc<dyn Mailer>),
            Err(err) => {
                tracing::warn!(error = %err, "report email disabled");
                None
            }
        };
        #[allow(unused_mut)]
        let mut state = Self::new(config, crew);
        #[cfg(feature = "mail")]
        {
            state.mailer = mailer;
        }
        Ok(state)
    }

    #[cfg(feature = "mail")]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub async fn job(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            job.status = status;
        }
    }
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/", get(dashboard_page))
        .route("/api/agents", get(list_agents))
        .route("/api/dashboard", get(dashboard_metrics))
        .route("/api/system", get(system_status))
        .route("/api/reports", get(list_reports))
        .route("/api/reports/:name", get(read_report))
        .route("/api/meetings", post(create_meeting))
        .route("/api/meetings/:id", get(meeting_status))
        .route("/events", get(stream_events));
    #[cfg(feature = "mail")]
    let router = router.route("/api/reports/:name/email", post(email_report));
    router.with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "dashboard listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .map_err(|err| MeetprepError::Protocol(format!("server error: {err}")))?;
    Ok(())
}

struct ApiError(MeetprepError);

impl From<MeetprepError> for ApiError {
    fn from(err: MeetprepError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            MeetprepError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": "invalid input", "details": errors}),
            ),
            MeetprepError::RateLimited(_) => {
                (StatusCode::TOO_MANY_REQUESTS, json!({"error": self.0.to_string()}))
            }
            MeetprepError::NotFound(_) => (StatusCode::NOT_FOUND, json!({"error": self.0.to_string()})),
            MeetprepError::Config(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({"error": self.0.to_string()}))
            }
            MeetprepError::Mail(_)
            | MeetprepError::LanguageModel(_)
            | MeetprepError::ModelUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, json!({"error": self.0.to_string()}))
            }
            _ => {
                tracing::error!(error = %self.0, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": self.0.to_string()}))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    Json(state.crew.agents())
}

async fn dashboard_metrics(State(state): State<AppState>) -> ApiResult<Json<DashboardMetrics>> {
    Ok(Json(DashboardMetrics::collect(&state.reports, &state.metrics).await?))
}

async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "health": SystemHealth::check(&state.config),
        "info": state.config.system_info(),
        "model": state.config.safe_model_settings(),
    }))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(state.config.reports.history_len);
    Ok(Json(state.reports.recent(limit).await?))
}

async fn read_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let content = state.reports.read(&name).await?;
    Ok(Json(json!({ "name": name, "content": content })))
}

async fn create_meeting(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<MeetingRequest>,
) -> ApiResult<Response> {
    let client = connect.map_or_else(|| "local".to_string(), |ConnectInfo(addr)| addr.ip().to_string());
    if !state.limiter.check(&client) {
        log_security_event("rate_limited", "meeting submission rejected", Some(&client));
        return Err(MeetprepError::RateLimited(client).into());
    }

    let errors = request.validation_errors(&state.config.meeting);
    if !errors.is_empty() {
        log_security_event("invalid_meeting_request", &errors.join("; "), Some(&client));
        return Err(MeetprepError::Validation(errors).into());
    }

    let id = Uuid::new_v4();
    let job = Job {
        id,
        company: request.company_name.trim().to_string(),
        created_at: Local::now(),
        status: JobStatus::Queued,
    };
    {
        let mut jobs = state.jobs.write().await;
        prune_jobs(&mut jobs, Local::now());
        jobs.insert(id, job);
    }
    tokio::spawn(run_job(state.clone(), id, request));

    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": id }))).into_response())
}

/// Drop finished jobs past their TTL, then the oldest finished ones until
/// there is room for a new job. Queued and running jobs are never dropped.
fn prune_jobs(jobs: &mut HashMap<Uuid, Job>, now: DateTime<Local>) {
    let expiry = now - chrono::Duration::minutes(FINISHED_JOB_TTL_MINUTES);
    jobs.retain(|_, job| !(job.status.is_finished() && job.created_at < expiry));

    if jobs.len() < MAX_JOBS {
        return;
    }
    let mut finished: Vec<(DateTime<Local>, Uuid)> = jobs
        .values()
        .filter(|job| job.status.is_finished())
        .map(|job| (job.created_at, job.id))
        .collect();
    finished.sort();
    let excess = jobs.len() + 1 - MAX_JOBS;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
}

async fn run_job(state: AppState, id: Uuid, request: MeetingRequest) {
    let mut rx = state.events.subscribe();
    let tracker = {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PipelineEvent::StageStarted { run_id, stage, .. }) if run_id == id => {
                        state.set_status(id, JobStatus::Running { stage }).await;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let outcome = state.crew.kickoff_as(id, &request).await;
    tracker.abort();
    let _ = tracker.await;

    let status = match outcome {
        Ok(output) => match state
            .reports
            .save(&output.final_output, &request.company_name)
            .await
        {
            Ok(entry) => {
                if let Err(err) = state.reports.clean_old(state.config.reports.keep_files).await {
                    tracing::warn!(error = %err, "report cleanup failed");
                }
                JobStatus::Completed { report: entry.name }
            }
            Err(err) => JobStatus::Failed {
                error: err.to_string(),
            },
        },
        Err(err) => JobStatus::Failed {
            error: err.to_string(),
        },
    };
    state.set_status(id, status).await;
}

async fn meeting_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    state
        .job(id)
        .await
        .map(Json)
        .ok_or_else(|| MeetprepError::NotFound(format!("job `{id}`")).into())
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        let event = msg.ok()?;
        Event::default().json_data(&event).ok().map(Ok::<Event, Infallible>)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(feature = "mail")]
#[derive(Deserialize)]
struct EmailRequest {
    to: String,
    subject: Option<String>,
}

#[cfg(feature = "mail")]
async fn email_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EmailRequest>,
) -> ApiResult<impl IntoResponse> {
    let mailer = state
        .mailer
        .clone()
        .ok_or_else(|| MeetprepError::Config("SMTP credentials are not configured".into()))?;
    let content = state.reports.read(&name).await?;
    let subject = req
        .subject
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("Meeting preparation: {name}"));
    mailer
        .send_html(&req.to, &subject, &render_report_html(&subject, &content))
        .await?;
    Ok(Json(json!({ "sent": true, "to": req.to })))
}

async fn dashboard_page() -> Html<&'static str> {
    Html(
        r##"
<!doctype html>
<html>
<head>
    <meta charset="utf-8" />
    <title>Meeting Preparation</title>
    <style>
        body { font-family: sans-serif; margin: 2rem; }
        .column { float: left; width: 45%; margin-right: 5%; }
        .panel { border: 1px solid #ccc; padding: 1rem; margin-bottom: 1rem; border-radius: 8px; }
        h2 { margin-top: 0; }
        label { display: block; margin-top: .5rem; }
        input, textarea { width: 100%; }
        progress { width: 100%; }
        #events { background: #111; color: #0f0; height: 160px; overflow: auto; font-family: monospace; padding: 1rem; }
        #report { white-space: pre-wrap; }
    </style>
</head>
<body>
    <h1>Meeting Preparation</h1>
    <div class="column">
        <div class="panel">
            <h2>New meeting</h2>
            <form id="meeting">
                <label>Company <input name="company_name" required /></label>
                <label>Objective <textarea name="meeting_objective" rows="3" required></textarea></label>
                <label>Attendees (one per line) <textarea name="attendees" rows="4" required></textarea></label>
                <label>Duration (minutes) <input name="meeting_duration" type="number" min="15" max="180" step="15" value="60" /></label>
                <label>Focus areas <textarea name="focus_areas" rows="2" required></textarea></label>
                <button type="submit">Prepare</button>
            </form>
            <p id="status"></p>
            <progress id="progress" max="4" value="0"></progress>
        </div>
        <div class="panel">
            <h2>Agents</h2>
            <ul id="agents"></ul>
        </div>
    </div>
    <div class="column">
        <div class="panel">
            <h2>Overview</h2>
            <ul id="metrics"></ul>
        </div>
        <div class="panel">
            <h2>Recent reports</h2>
            <ul id="reports"></ul>
        </div>
        <div class="panel">
            <h2>Events</h2>
            <div id="events"></div>
        </div>
    </div>
    <div style="clear: both" class="panel"><div id="report"></div></div>
    <script>
        const text = (s) => String(s).replace(/[&<>"']/g, c => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;',"'":'&#x27;'}[c]));
        async function openReport(name) {
            const r = await fetch('/api/reports/' + encodeURIComponent(name)).then(r => r.json());
            document.getElementById('report').textContent = r.content || r.error;
        }
        async function load() {
            const agents = await fetch('/api/agents').then(r => r.json());
            document.getElementById('agents').innerHTML = agents.map(a => `<li><b>${text(a.role)}</b>: ${text(a.goal)}</li>`).join('');
            const m = await fetch('/api/dashboard').then(r => r.json());
            document.getElementById('metrics').innerHTML = [
                `Total meetings: ${m.total_reports} (+${m.recent_reports} this week)`,
                `Companies: ${m.unique_companies}`,
                `Average preparation: ${m.avg_prep_minutes} min`,
                `Success rate: ${m.success_rate}%`,
            ].map(l => `<li>${l}</li>`).join('');
            const reports = await fetch('/api/reports').then(r => r.json());
            document.getElementById('reports').innerHTML = reports.map(r =>
                `<li><a href="#" data-name="${text(r.name)}">${text(r.company)}</a> ${text(r.modified)}</li>`).join('');
            document.querySelectorAll('#reports a').forEach(a => a.onclick = (ev) => { ev.preventDefault(); openReport(a.dataset.name); });
        }
        let currentJob = null;
        document.getElementById('meeting').onsubmit = async (ev) => {
            ev.preventDefault();
            const data = Object.fromEntries(new FormData(ev.target));
            data.meeting_duration = Number(data.meeting_duration);
            const resp = await fetch('/api/meetings', { method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify(data) });
            const body = await resp.json();
            if (resp.status !== 202) {
                document.getElementById('status').textContent = (body.details || [body.error]).join('; ');
                return;
            }
            currentJob = body.job_id;
            document.getElementById('progress').value = 0;
            document.getElementById('status').textContent = 'Queued';
        };
        const evt = new EventSource('/events');
        evt.onmessage = async (ev) => {
            const e = JSON.parse(ev.data);
            const node = document.getElementById('events');
            node.innerText += `${e.type} ${e.stage || ''}\n`;
            node.scrollTop = node.scrollHeight;
            if (e.run_id !== currentJob) return;
            if (e.type === 'stage_started') document.getElementById('status').textContent = e.title;
            if (e.type === 'stage_completed') document.getElementById('progress').value = e.index + 1;
            if (e.type === 'failed') document.getElementById('status').textContent = e.error;
            if (e.type === 'finished') {
                for (let i = 0; i < 20; i++) {
                    const job = await fetch('/api/meetings/' + currentJob).then(r => r.json());
                    if (job.state === 'completed') { document.getElementById('status').textContent = 'Done'; openReport(job.report); break; }
                    if (job.state === 'failed') { document.getElementById('status').textContent = job.error; break; }
                    await new Promise(r => setTimeout(r, 250));
                }
                load();
            }
        };
        load();
    </script>
</body>
</html>
"##,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(age_minutes: i64, status: JobStatus, now: DateTime<Local>) -> Job {
        Job {
            id: Uuid::new_v4(),
            company: "Acme".into(),
            created_at: now - chrono::Duration::minutes(age_minutes),
            status,
        }
    }

    fn completed() -> JobStatus {
        JobStatus::Completed {
            report: "meeting_prep_Acme_01012024_000000.md".into(),
        }
    }

    #[test]
    fn expired_finished_jobs_are_dropped() {
        let now = Local::now();
        let mut jobs = HashMap::new();
        for j in [
            job(120, completed(), now),
            job(120, JobStatus::Running { stage: "context_analysis".into() }, now),
            job(5, completed(), now),
        ] {
            jobs.insert(j.id, j);
        }

        prune_jobs(&mut jobs, now);

        assert_eq!(jobs.len(), 2);
        assert!(jobs
            .values()
            .all(|j| !j.status.is_finished() || j.created_at > now - chrono::Duration::minutes(10)));
    }

    #[test]
    fn job_table_is_capped() {
        let now = Local::now();
        let mut jobs = HashMap::new();
        for age in 0..MAX_JOBS as i64 {
            let j = job(age % 50, completed(), now);
            jobs.insert(j.id, j);
        }
        let active = job(59, JobStatus::Queued, now);
        let active_id = active.id;
        jobs.insert(active_id, active);

        prune_jobs(&mut jobs, now);

        assert_eq!(jobs.len(), MAX_JOBS - 1);
        assert!(jobs.contains_key(&active_id));
    }
}
