//! Transactional email: templates and delivery.
//!
//! Request paths (forgot password, admin preview) send directly under a short
//! timeout. Everything else goes through the `emails` outbox drained by
//! [`crate::api::jobs`]. Without an SMTP host the [`LogMailer`] only logs.

use crate::api::models::{EmailType, OutboxEmail};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub const WAITLIST_CODE_VAR: &str = "WaitlistCode";
pub const FORGOT_PASSWORD_SUBJECT: &str = "Forgot Password";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub tag: Option<EmailType>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Sender for local development: logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to,
            subject = %message.subject,
            body = %message.text,
            "email send stub"
        );
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    /// STARTTLS relay with optional credentials.
    ///
    /// # Errors
    /// Returns an error if the relay or the sender address is invalid.
    pub fn new(
        host: &str,
        port: u16,
        credentials: Option<(String, SecretString)>,
        sender: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid SMTP relay: {host}"))?
            .port(port)
            .timeout(Some(timeout));

        if let Some((username, password)) = credentials {
            builder = builder.credentials(Credentials::new(
                username,
                password.expose_secret().to_string(),
            ));
        }

        let sender = sender
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address: {sender}"))?;

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let to = message
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient address: {}", message.to))?;

        let builder = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(message.subject.clone());

        let email = match &message.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                html.clone(),
            )),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.text.clone()),
        }
        .context("failed to build email")?;

        self.transport
            .send(email)
            .await
            .with_context(|| format!("sending email to {}", message.to))?;

        debug!(to_email = %message.to, "email delivered");
        Ok(())
    }
}

/// Deliver `message`, giving up after `timeout`.
///
/// # Errors
/// Returns the delivery error or a timeout error.
pub async fn send_with_timeout(
    mailer: &dyn Mailer,
    message: &EmailMessage,
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, mailer.send(message))
        .await
        .map_err(|_| anyhow!("timed out sending email to {}", message.to))?
}

struct Template {
    name: &'static str,
    subject: &'static str,
    text: &'static str,
    html: &'static str,
}

const WAITLIST_TEMPLATE: Template = Template {
    name: "waitlist",
    subject: "Your waitlist code",
    text: include_str!("templates/waitlist.txt"),
    html: include_str!("templates/waitlist.html"),
};

fn template_for(email_type: EmailType) -> Option<&'static Template> {
    match email_type {
        EmailType::Waitlist => Some(&WAITLIST_TEMPLATE),
        EmailType::ForgotPassword => None,
    }
}

#[must_use]
pub fn waitlist_template_name() -> &'static str {
    WAITLIST_TEMPLATE.name
}

/// Substitute `{{Key}}` placeholders.
#[must_use]
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    vars.iter().fold(template.to_string(), |rendered, (key, value)| {
        rendered.replace(&format!("{{{{{key}}}}}"), value)
    })
}

fn templated_message(
    email_type: EmailType,
    to: &str,
    vars: &HashMap<String, String>,
) -> Result<EmailMessage> {
    let template = template_for(email_type)
        .ok_or_else(|| anyhow!("no template info for email type: {}", email_type.as_str()))?;

    Ok(EmailMessage {
        to: to.to_string(),
        subject: template.subject.to_string(),
        text: render(template.text, vars),
        html: Some(render(template.html, vars)),
        tag: Some(email_type),
    })
}

/// # Errors
/// Fails only if the waitlist template is missing.
pub fn waitlist_message(to: &str, waitlist_code: &str) -> Result<EmailMessage> {
    templated_message(
        EmailType::Waitlist,
        to,
        &waitlist_vars(waitlist_code),
    )
}

#[must_use]
pub fn waitlist_vars(waitlist_code: &str) -> HashMap<String, String> {
    HashMap::from([(WAITLIST_CODE_VAR.to_string(), waitlist_code.to_string())])
}

/// # Errors
/// Fails when the row's type has no template.
pub fn outbox_message(email: &OutboxEmail) -> Result<EmailMessage> {
    templated_message(email.email_type, &email.email_address, &email.template_vars)
}

#[must_use]
pub fn forgot_password_message(to: &str, token: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: FORGOT_PASSWORD_SUBJECT.to_string(),
        text: format!("Your password reset token is: {token:?}"),
        html: None,
        tag: Some(EmailType::ForgotPassword),
    }
}

/// Captures messages for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    sent: std::sync::Mutex<Vec<EmailMessage>>,
    fail: bool,
}

#[cfg(test)]
impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: std::sync::Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.fail {
            anyhow::bail!("delivery refused");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("mailer lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_placeholders() {
        let vars = waitlist_vars("WAIT-123456");
        let rendered = render("code: {{WaitlistCode}} / {{Other}}", &vars);
        assert_eq!(rendered, "code: WAIT-123456 / {{Other}}");
    }

    #[test]
    fn waitlist_message_uses_template() {
        let message = waitlist_message("learner@ggwp.test", "WAIT-654321").unwrap();
        assert_eq!(message.subject, "Your waitlist code");
        assert!(message.text.contains("WAIT-654321"));
        assert!(message.html.unwrap().contains("WAIT-654321"));
        assert_eq!(message.tag, Some(EmailType::Waitlist));
    }

    #[test]
    fn forgot_password_body_quotes_the_token() {
        let message = forgot_password_message("learner@ggwp.test", "042042");
        assert_eq!(message.subject, "Forgot Password");
        assert_eq!(message.text, "Your password reset token is: \"042042\"");
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        struct Slow;

        #[async_trait]
        impl Mailer for Slow {
            async fn send(&self, _message: &EmailMessage) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let message = forgot_password_message("learner@ggwp.test", "000000");
        let result = send_with_timeout(&Slow, &message, Duration::from_millis(10)).await;
        assert!(result.is_err());
    }
}
