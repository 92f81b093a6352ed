//! Input hardening for everything that comes in through the dashboard.

use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;

const SAFE_FILENAME_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_. ";
const RESERVED_NAMES: [&str; 8] = ["con", "prn", "aux", "nul", "com1", "com2", "lpt1", "lpt2"];
const SUSPICIOUS_WORDS: [&str; 6] = ["<", ">", "script", "javascript", "eval", "exec"];
const MAX_FILENAME_CHARS: usize = 50;
const MAX_ATTENDEE_LINE: usize = 100;

fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)<script[^>]*>.*?</script>",
            r"(?i)javascript:",
            r"(?i)on\w+\s*=",
            r"(?i)<iframe[^>]*>.*?</iframe>",
            r"(?i)eval\s*\(",
            r"(?i)exec\s*\(",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).unwrap())
        .collect()
    })
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
    })
}

fn company_charset() -> &'static Regex {
    static COMPANY: OnceLock<Regex> = OnceLock::new();
    COMPANY.get_or_init(|| {
        Regex::new(r"^[\p{L}\p{N}\s\-&.,()']+$").unwrap()
    })
}

fn whitespace_run() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Truncate, strip script-like content, then HTML-escape.
pub fn sanitize_input(text: &str, max_length: usize) -> String {
    let mut cleaned = take_chars(text, max_length).to_string();
    for pattern in dangerous_patterns() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    html_escape(&cleaned).trim().to_string()
}

/// True when the text carries no markup or script-like content.
pub fn is_safe_text(text: &str) -> bool {
    !text.contains(['<', '>']) && !dangerous_patterns().iter().any(|p| p.is_match(text))
}

pub fn sanitize_filename(filename: &str) -> String {
    let kept: String = filename
        .chars()
        .filter(|c| SAFE_FILENAME_CHARS.contains(*c))
        .collect();
    let collapsed = whitespace_run().replace_all(&kept, " ");
    let trimmed = collapsed.trim().trim_start_matches('.');
    let mut safe = take_chars(trimmed, MAX_FILENAME_CHARS).trim_end().to_string();

    if safe.is_empty() {
        safe = "unnamed_file".to_string();
    }
    if RESERVED_NAMES.contains(&safe.to_lowercase().as_str()) {
        safe = format!("file_{safe}");
    }
    safe
}

/// Accept only relative paths that never step outside their base.
pub fn validate_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    candidate
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    if !email_pattern().is_match(email) {
        return false;
    }
    !(email.contains("..") || email.starts_with('.') || email.ends_with('.'))
}

pub fn validate_company_name(name: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let name = name.trim();
    if name.is_empty() {
        errors.push("company name must not be empty".to_string());
        return errors;
    }
    let len = name.chars().count();
    if len < 2 {
        errors.push("company name must be at least 2 characters".to_string());
    } else if len > 100 {
        errors.push("company name must not exceed 100 characters".to_string());
    }
    errors.extend(company_name_content_errors(name));
    errors
}

/// Charset and keyword checks only; lengths are the caller's business.
pub fn company_name_content_errors(name: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if !company_charset().is_match(name) {
        errors.push("company name contains invalid characters".to_string());
    }
    let lowered = name.to_lowercase();
    if SUSPICIOUS_WORDS.iter().any(|word| lowered.contains(word)) {
        errors.push("company name contains disallowed content".to_string());
    }
    errors
}

pub fn validate_meeting_objective(objective: &str) -> Vec<String> {
    if !objective.trim().is_empty() && !is_safe_text(objective) {
        vec!["meeting objective contains unsafe content".to_string()]
    } else {
        Vec::new()
    }
}

pub fn validate_attendee_lines(attendees: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let lines = attendees.lines().map(str::trim).filter(|line| !line.is_empty());
    for (idx, line) in lines.enumerate() {
        let n = idx + 1;
        if line.chars().count() > MAX_ATTENDEE_LINE {
            errors.push(format!(
                "attendee {n} is too long (max {MAX_ATTENDEE_LINE} characters)"
            ));
        }
        if !is_safe_text(line) {
            errors.push(format!("attendee {n} contains unsafe content"));
        }
    }
    errors
}

pub fn log_security_event(kind: &str, details: &str, subject: Option<&str>) {
    tracing::warn!(
        target: "meetprep::security",
        event = kind,
        subject = subject.unwrap_or("-"),
        "{details}"
    );
}

/// Sliding-window request limiter keyed by caller.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key`; false when the caller is over the limit.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let Ok(mut hits) = self.hits.lock() else {
            return false;
        };
        // Callers whose window has emptied are forgotten.
        hits.retain(|_, window| {
            while window
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                window.pop_front();
            }
            !window.is_empty()
        });

        let window = hits.entry(key.to_string()).or_default();
        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.hits.lock().map(|hits| hits.len()).unwrap_or_default()
    }
}
