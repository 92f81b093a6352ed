use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MeetprepError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8501
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            api_key: None,
            base_url: None,
            organization: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub serper_api_key: Option<String>,
    #[serde(default = "default_serper_endpoint")]
    pub serper_endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_wikipedia_endpoint")]
    pub wikipedia_endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            serper_api_key: None,
            serper_endpoint: default_serper_endpoint(),
            max_results: default_max_results(),
            wikipedia_endpoint: default_wikipedia_endpoint(),
        }
    }
}

fn default_serper_endpoint() -> String {
    "https://google.serper.dev/search".into()
}

fn default_max_results() -> usize {
    5
}

fn default_wikipedia_endpoint() -> String {
    "https://en.wikipedia.org/w/api.php".into()
}

/// Bounds applied to meeting requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingLimits {
    #[serde(default = "default_min_duration")]
    pub min_duration: u32,
    #[serde(default = "default_max_duration")]
    pub max_duration: u32,
    #[serde(default = "default_duration")]
    pub default_duration: u32,
    #[serde(default = "default_duration_step")]
    pub duration_step: u32,
    #[serde(default = "default_min_attendees")]
    pub min_attendees: usize,
    #[serde(default = "default_max_attendees")]
    pub max_attendees: usize,
    #[serde(default = "default_max_company_name")]
    pub max_company_name_length: usize,
    #[serde(default = "default_max_objective")]
    pub max_objective_length: usize,
    #[serde(default = "default_max_focus_areas")]
    pub max_focus_areas_length: usize,
}

impl Default for MeetingLimits {
    fn default() -> Self {
        Self {
            min_duration: default_min_duration(),
            max_duration: default_max_duration(),
            default_duration: default_duration(),
            duration_step: default_duration_step(),
            min_attendees: default_min_attendees(),
            max_attendees: default_max_attendees(),
            max_company_name_length: default_max_company_name(),
            max_objective_length: default_max_objective(),
            max_focus_areas_length: default_max_focus_areas(),
        }
    }
}

fn default_min_duration() -> u32 {
    15
}

fn default_max_duration() -> u32 {
    180
}

fn default_duration() -> u32 {
    60
}

fn default_duration_step() -> u32 {
    15
}

fn default_min_attendees() -> usize {
    1
}

fn default_max_attendees() -> usize {
    20
}

fn default_max_company_name() -> usize {
    100
}

fn default_max_objective() -> usize {
    500
}

fn default_max_focus_areas() -> usize {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportsConfig {
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_keep_files")]
    pub keep_files: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
            history_len: default_history_len(),
            keep_files: default_keep_files(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_history_len() -> usize {
    5
}

fn default_keep_files() -> usize {
    10
}

fn default_max_file_size_mb() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
        }
    }
}

fn default_rate_limit_requests() -> usize {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
        }
    }
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactsConfig {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_people_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            endpoint: default_people_endpoint(),
            page_size: default_page_size(),
            backup_path: default_backup_path(),
        }
    }
}

fn default_people_endpoint() -> String {
    "https://people.googleapis.com/v1".into()
}

fn default_page_size() -> u32 {
    100
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("contacts_backup.json")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Language every agent is told to answer in.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_notes_path")]
    pub notes_path: PathBuf,
    #[serde(default = "default_research_output")]
    pub research_output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            max_steps: default_max_steps(),
            notes_path: default_notes_path(),
            research_output: default_research_output(),
        }
    }
}

fn default_language() -> String {
    "Vietnamese".into()
}

fn default_max_steps() -> usize {
    6
}

fn default_notes_path() -> PathBuf {
    PathBuf::from("user_info.json")
}

fn default_research_output() -> PathBuf {
    PathBuf::from("research_output.txt")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub meeting: MeetingLimits,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub contacts: ContactsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Model parameters after clamping.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub has_api_key: bool,
}

/// Diagnostic snapshot shown on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub version: String,
    pub os_name: String,
    pub current_dir: String,
    pub reports_dir_exists: bool,
    pub env_file_exists: bool,
    pub has_openai_key: bool,
    pub has_serper_key: bool,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| MeetprepError::Config(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Load the file when it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn from_env_or_file(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                return Err(MeetprepError::Config(format!(
                    "configuration file `{}` not found",
                    path.display()
                )))
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Ok(model) = env::var("MEETPREP_MODEL") {
            self.model.model = model;
        }
        if let Ok(key) = env::var("SERPER_API_KEY") {
            self.search.serper_api_key = Some(key);
        }
        if let Ok(user) = env::var("SMTP_USERNAME") {
            self.smtp.username = Some(user);
        }
        if let Ok(password) = env::var("SMTP_PASSWORD") {
            self.smtp.password = Some(password);
        }
        if let Ok(token) = env::var("GOOGLE_ACCESS_TOKEN") {
            self.contacts.access_token = Some(token);
        }
        if let Ok(host) = env::var("MEETPREP_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("MEETPREP_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(dir) = env::var("MEETPREP_REPORTS_DIR") {
            self.reports.dir = PathBuf::from(dir);
        }
    }

    pub fn missing_api_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.model.api_key) {
            missing.push("OPENAI_API_KEY");
        }
        if is_blank(&self.search.serper_api_key) {
            missing.push("SERPER_API_KEY");
        }
        missing
    }

    pub fn validate_api_keys(&self) -> Result<()> {
        let missing = self.missing_api_keys();
        if missing.is_empty() {
            return Ok(());
        }
        Err(MeetprepError::Config(format!(
            "missing required API keys: {}",
            missing.join(", ")
        )))
    }

    /// Copy with every secret replaced by a mask, for display.
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "********".to_string());
        let mut cfg = self.clone();
        cfg.model.api_key = mask(&self.model.api_key);
        cfg.search.serper_api_key = mask(&self.search.serper_api_key);
        cfg.smtp.password = mask(&self.smtp.password);
        cfg.contacts.access_token = mask(&self.contacts.access_token);
        cfg
    }

    pub fn safe_model_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.model.model.clone(),
            temperature: self.model.temperature.clamp(0.0, 1.0),
            has_api_key: !is_blank(&self.model.api_key),
        }
    }

    pub fn validate_meeting_config(&self, duration: u32, attendees: usize) -> Vec<String> {
        let limits = &self.meeting;
        let mut errors = Vec::new();
        if duration < limits.min_duration {
            errors.push(format!(
                "meeting duration must be at least {} minutes",
                limits.min_duration
            ));
        } else if duration > limits.max_duration {
            errors.push(format!(
                "meeting duration should not exceed {} minutes",
                limits.max_duration
            ));
        }
        if attendees < limits.min_attendees {
            errors.push(format!(
                "at least {} attendee is required",
                limits.min_attendees
            ));
        } else if attendees > limits.max_attendees {
            errors.push(format!(
                "no more than {} attendees are allowed",
                limits.max_attendees
            ));
        }
        errors
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.reports.dir).map_err(|err| {
            MeetprepError::Config(format!(
                "cannot create reports directory `{}`: {err}",
                self.reports.dir.display()
            ))
        })
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            os_name: env::consts::OS.to_string(),
            current_dir: env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            reports_dir_exists: self.reports.dir.is_dir(),
            env_file_exists: Path::new(".env").exists(),
            has_openai_key: !is_blank(&self.model.api_key),
            has_serper_key: !is_blank(&self.search.serper_api_key),
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}
