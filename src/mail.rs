use crate::config::MailConfig;
use crate::diff::ChangeRecord;
use crate::profile::UserProfile;
use reqwest::Client;
use serde::Serialize;
use std::fmt::Write as _;
use std::future::Future;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail has no recipients")]
    NoRecipients,
    #[error("mail relay request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail relay rejected the message with status {0}")]
    Rejected(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
}

pub trait Mailer {
    fn send(&self, mail: &OutgoingMail) -> impl Future<Output = Result<(), MailError>> + Send;
}

/// Builds the alert mail for one episode: every change with its old and new
/// value plus the owner's contact details.
pub fn compose_alert(
    changes: &[ChangeRecord],
    profile: Option<&UserProfile>,
    operator_address: Option<&str>,
) -> OutgoingMail {
    let name = UserProfile::display_name(profile);
    let email = profile
        .map(|p| p.email.trim())
        .filter(|e| !e.is_empty());

    let mut body = String::from("The following hardware changes were detected:\n\n");
    for change in changes {
        let _ = writeln!(
            body,
            "- {}: {} -> {} (detected at {})",
            change.component,
            change.old_display(),
            change.new_display(),
            humantime::format_rfc3339_seconds(change.detected_at)
        );
    }
    let _ = write!(
        body,
        "\nUser details:\nName: {name}\nEmail: {}\n",
        email.unwrap_or("not provided")
    );

    let mut to: Vec<String> = Vec::new();
    for address in [operator_address.map(str::trim), email].into_iter().flatten() {
        if !address.is_empty() && !to.iter().any(|t| t.eq_ignore_ascii_case(address)) {
            to.push(address.to_string());
        }
    }

    OutgoingMail {
        subject: format!("Hardware change detected for {name}"),
        body,
        to,
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
}

/// Delivers mail by posting JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpRelayMailer {
    client: Client,
    url: String,
    from: String,
    api_key: Option<String>,
}

impl HttpRelayMailer {
    pub fn new(url: String, from: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("hostdrift/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url,
            from,
            api_key,
        }
    }
}

impl Mailer for HttpRelayMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if mail.to.is_empty() {
            return Err(MailError::NoRecipients);
        }
        let payload = RelayRequest {
            from: &self.from,
            to: &mail.to,
            subject: &mail.subject,
            body: &mail.body,
        };
        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(MailError::Rejected(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Stand-in used when mail delivery is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyMailer;

impl Mailer for LogOnlyMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        info!(to = ?mail.to, subject = %mail.subject, "mail delivery disabled, alert logged only");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum MailTransport {
    Relay(HttpRelayMailer),
    LogOnly(LogOnlyMailer),
}

impl MailTransport {
    pub fn from_config(cfg: &MailConfig) -> Self {
        match (cfg.enabled, cfg.relay_url.as_deref()) {
            (true, Some(url)) => Self::Relay(HttpRelayMailer::new(
                url.to_string(),
                cfg.from.clone(),
                resolve_api_key(&cfg.api_key_env),
            )),
            _ => Self::LogOnly(LogOnlyMailer),
        }
    }
}

impl Mailer for MailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        match self {
            Self::Relay(m) => m.send(mail).await,
            Self::LogOnly(m) => m.send(mail).await,
        }
    }
}

fn resolve_api_key(env_name: &str) -> Option<String> {
    std::env::var(env_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
