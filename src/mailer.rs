use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, Message as MailMessage};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::{MeetprepError, Result};
use crate::security::{html_escape, validate_email};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Sends mail over SMTP with implicit TLS.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self> {
        let (Some(username), Some(password)) = (
            cfg.username.as_deref().filter(|v| !v.trim().is_empty()),
            cfg.password.as_deref().filter(|v| !v.is_empty()),
        ) else {
            return Err(MeetprepError::Config(
                "SMTP_USERNAME and SMTP_PASSWORD must be set".into(),
            ));
        };

        let from = username
            .parse::<Mailbox>()
            .map_err(|err| MeetprepError::Config(format!("invalid sender `{username}`: {err}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
            .map_err(|err| MeetprepError::Config(format!("invalid SMTP host `{}`: {err}", cfg.host)))?
            .port(cfg.port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self { from, transport })
    }
}

pub(crate) fn build_message(from: Mailbox, to: &str, subject: &str, html: &str) -> Result<MailMessage> {
    if !validate_email(to) {
        return Err(MeetprepError::Validation(vec![format!(
            "invalid recipient `{to}`"
        )]));
    }
    let to = to
        .parse::<Mailbox>()
        .map_err(|err| MeetprepError::Mail(format!("invalid recipient: {err}")))?;
    MailMessage::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|err| MeetprepError::Mail(err.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let message = build_message(self.from.clone(), to, subject, html)?;
        self.transport
            .send(message)
            .await
            .map_err(|err| MeetprepError::Mail(err.to_string()))?;
        tracing::info!(to, subject, "mail sent");
        Ok(())
    }
}

/// Minimal HTML document carrying the escaped markdown report.
pub fn render_report_html(title: &str, markdown: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body style=\"font-family: sans-serif; max-width: 860px; margin: auto;\">\n\
         <h2>{title}</h2>\n<pre style=\"white-space: pre-wrap; font-family: inherit;\">{body}</pre>\n\
         </body>\n</html>\n",
        title = html_escape(title),
        body = html_escape(markdown),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_are_a_config_error() {
        let err = SmtpMailer::from_config(&SmtpConfig::default()).err().unwrap();
        assert!(matches!(err, MeetprepError::Config(_)));
    }

    #[tokio::test]
    async fn configured_mailer_builds_without_connecting() {
        let cfg = SmtpConfig {
            username: Some("me@example.com".into()),
            password: Some("app-password".into()),
            ..SmtpConfig::default()
        };
        assert!(SmtpMailer::from_config(&cfg).is_ok());
    }

    #[test]
    fn recipient_is_validated() {
        let from: Mailbox = "me@example.com".parse().unwrap();
        assert!(matches!(
            build_message(from.clone(), "not-an-address", "s", "<p>x</p>"),
            Err(MeetprepError::Validation(_))
        ));
        assert!(build_message(from, "you@example.com", "Brief", "<p>x</p>").is_ok());
    }

    #[test]
    fn report_html_is_escaped() {
        let html = render_report_html("Acme & Co", "# Title\n<script>x</script>");
        assert!(html.contains("<title>Acme &amp; Co</title>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
