use serde::{Deserialize, Serialize};

use crate::config::MeetingLimits;
use crate::error::{MeetprepError, Result};
use crate::security;

/// Everything the user tells us about the upcoming meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub company_name: String,
    pub meeting_objective: String,
    /// One attendee per line.
    pub attendees: String,
    pub meeting_duration: u32,
    pub focus_areas: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub role: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn for_duration(minutes: u32) -> Self {
        if minutes > 90 {
            Complexity::High
        } else if minutes > 45 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}

/// Headline numbers shown next to the form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingSummary {
    pub duration_minutes: u32,
    pub attendee_count: usize,
    pub complexity: Complexity,
    pub company_name: String,
}

impl MeetingRequest {
    pub fn attendee_count(&self) -> usize {
        self.attendees
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
    }

    pub fn complexity(&self) -> Complexity {
        Complexity::for_duration(self.meeting_duration)
    }

    pub fn summary(&self) -> MeetingSummary {
        MeetingSummary {
            duration_minutes: self.meeting_duration,
            attendee_count: self.attendee_count(),
            complexity: self.complexity(),
            company_name: self.company_name.trim().to_string(),
        }
    }

    pub fn parsed_attendees(&self) -> Vec<Attendee> {
        parse_attendees(&self.attendees)
    }

    /// Collect every problem with the request rather than stopping at the first.
    pub fn validation_errors(&self, limits: &MeetingLimits) -> Vec<String> {
        let mut errors = Vec::new();

        let company = self.company_name.trim();
        let company_len = company.chars().count();
        if company.is_empty() {
            errors.push("company name must not be empty".to_string());
        } else if company_len < 2 {
            errors.push("company name must be at least 2 characters".to_string());
        } else if company_len > limits.max_company_name_length {
            errors.push(format!(
                "company name must not exceed {} characters",
                limits.max_company_name_length
            ));
        }

        let objective = self.meeting_objective.trim();
        let objective_len = objective.chars().count();
        if objective.is_empty() {
            errors.push("meeting objective must not be empty".to_string());
        } else if objective_len < 10 {
            errors.push("meeting objective must be at least 10 characters".to_string());
        } else if objective_len > limits.max_objective_length {
            errors.push(format!(
                "meeting objective must not exceed {} characters",
                limits.max_objective_length
            ));
        }

        let attendees = self.attendee_count();
        if attendees < limits.min_attendees.max(1) {
            errors.push("at least one attendee is required".to_string());
        } else if attendees > limits.max_attendees {
            errors.push(format!(
                "no more than {} attendees are allowed",
                limits.max_attendees
            ));
        }

        let focus = self.focus_areas.trim();
        let focus_len = focus.chars().count();
        if focus.is_empty() {
            errors.push("focus areas must not be empty".to_string());
        } else if focus_len < 5 {
            errors.push("focus areas must be at least 5 characters".to_string());
        } else if focus_len > limits.max_focus_areas_length {
            errors.push(format!(
                "focus areas must not exceed {} characters",
                limits.max_focus_areas_length
            ));
        }

        if let Err(message) = validate_duration(self.meeting_duration, limits) {
            errors.push(message);
        }

        if !company.is_empty() {
            errors.extend(security::company_name_content_errors(company));
        }
        errors.extend(security::validate_meeting_objective(objective));
        errors.extend(security::validate_attendee_lines(&self.attendees));
        if !focus.is_empty() && !security::is_safe_text(focus) {
            errors.push("focus areas contain unsafe content".to_string());
        }

        errors
    }

    pub fn validate(&self, limits: &MeetingLimits) -> Result<()> {
        let errors = self.validation_errors(limits);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeetprepError::Validation(errors))
        }
    }
}

pub fn validate_duration(minutes: u32, limits: &MeetingLimits) -> std::result::Result<(), String> {
    if minutes < limits.min_duration {
        Err(format!(
            "meeting duration must be at least {} minutes",
            limits.min_duration
        ))
    } else if minutes > limits.max_duration {
        Err(format!(
            "meeting duration should not exceed {} minutes",
            limits.max_duration
        ))
    } else if limits.duration_step > 0 && minutes % limits.duration_step != 0 {
        Err(format!(
            "meeting duration should be a multiple of {} minutes",
            limits.duration_step
        ))
    } else {
        Ok(())
    }
}

/// Accepts `Name - Role`, `Name (Role)` or a bare `Name` per line.
pub fn parse_attendees(text: &str) -> Vec<Attendee> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, role) = if let Some((name, role)) = line.split_once(" - ") {
                (name.trim(), role.trim())
            } else if let (Some(open), Some(close)) = (line.find('('), line.rfind(')')) {
                if open < close {
                    (line[..open].trim(), line[open + 1..close].trim())
                } else {
                    (line, "")
                }
            } else {
                (line, "")
            };
            Attendee {
                name: name.to_string(),
                role: role.to_string(),
                email: String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MeetingRequest {
        MeetingRequest {
            company_name: "Acme Corp".into(),
            meeting_objective: "Negotiate the 2025 supply contract".into(),
            attendees: "Jane Doe - CEO\nJohn Roe (CTO)\n\nMai".into(),
            meeting_duration: 60,
            focus_areas: "pricing, delivery SLAs".into(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate(&MeetingLimits::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let req = MeetingRequest {
            company_name: " ".into(),
            meeting_objective: "short".into(),
            attendees: "\n \n".into(),
            meeting_duration: 50,
            focus_areas: "x".into(),
        };
        let errors = req.validation_errors(&MeetingLimits::default());
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("multiple of 15")));
    }

    #[test]
    fn too_many_attendees() {
        let mut req = request();
        req.attendees = (0..21).map(|i| format!("Person {i}\n")).collect();
        let err = req.validate(&MeetingLimits::default()).unwrap_err();
        assert!(err.to_string().contains("no more than 20"));
    }

    #[test]
    fn script_in_objective_is_rejected() {
        let mut req = request();
        req.meeting_objective = "Discuss <script>alert(1)</script> roadmap".into();
        let errors = req.validation_errors(&MeetingLimits::default());
        assert!(errors.iter().any(|e| e.contains("unsafe")));
    }

    #[test]
    fn parses_attendee_formats() {
        let parsed = request().parsed_attendees();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].name, "Jane Doe");
        assert_eq!(parsed[0].role, "CEO");
        assert_eq!(parsed[1].name, "John Roe");
        assert_eq!(parsed[1].role, "CTO");
        assert_eq!(parsed[2].name, "Mai");
        assert_eq!(parsed[2].role, "");
    }

    #[test]
    fn complexity_thresholds() {
        assert_eq!(Complexity::for_duration(45), Complexity::Low);
        assert_eq!(Complexity::for_duration(60), Complexity::Medium);
        assert_eq!(Complexity::for_duration(90), Complexity::Medium);
        assert_eq!(Complexity::for_duration(120), Complexity::High);
        assert_eq!(request().summary().attendee_count, 3);
    }

    #[test]
    fn duration_bounds() {
        let limits = MeetingLimits::default();
        assert!(validate_duration(15, &limits).is_ok());
        assert!(validate_duration(180, &limits).is_ok());
        assert!(validate_duration(0, &limits).is_err());
        assert!(validate_duration(195, &limits).is_err());
    }
}
