//! Outbound mail gateway.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The gateway refused this message.
    Rejected(String),
    /// The gateway could not be reached.
    Unavailable(String),
    TimedOut,
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Rejected(msg) => write!(f, "mail rejected: {msg}"),
            MailError::Unavailable(msg) => write!(f, "mail gateway unavailable: {msg}"),
            MailError::TimedOut => write!(f, "mail delivery timed out"),
        }
    }
}

impl std::error::Error for MailError {}

/// Delivers mail.
///
/// Implementations abstract over the actual transport (SMTP relay, a
/// provider's HTTP API, ...).
#[async_trait]
pub trait Mailer: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the message could not be handed to the transport.
    async fn send_mail(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Writes mail to the log instead of sending it. For development.
#[derive(Clone, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(&self, mail: &Mail) -> Result<(), MailError> {
        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            "mail (log only): {}",
            mail.body
        );
        Ok(())
    }
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Plain connection upgraded with STARTTLS (usually port 587).
    StartTls,
    /// TLS from the first byte (usually port 465).
    Wrapper,
    /// No encryption. Local relays only.
    None,
}

impl std::str::FromStr for SmtpTls {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starttls" => Ok(SmtpTls::StartTls),
            "tls" => Ok(SmtpTls::Wrapper),
            "none" => Ok(SmtpTls::None),
            other => Err(format!("unknown SMTP TLS mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub tls: SmtpTls,
    /// Username and password, if the relay requires authentication.
    pub credentials: Option<(String, String)>,
}

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// # Errors
    ///
    /// Returns error if the relay host cannot be used for the TLS mode.
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = match settings.tls {
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host),
            SmtpTls::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)),
        }
        .map_err(|e| MailError::Unavailable(format!("SMTP relay error: {e}")))?;

        let mut builder = builder.port(settings.port);
        if let Some((username, password)) = &settings.credentials {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_mail(&self, mail: &Mail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                mail.from
                    .parse()
                    .map_err(|e| MailError::Rejected(format!("invalid from address: {e}")))?,
            )
            .to(mail
                .to
                .parse()
                .map_err(|e| MailError::Rejected(format!("invalid to address: {e}")))?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| MailError::Rejected(format!("failed to build mail: {e}")))?;

        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_timeout() => Err(MailError::TimedOut),
            // 5xx: the relay will never accept this message
            Err(e) if e.is_permanent() => Err(MailError::Rejected(e.to_string())),
            Err(e) => Err(MailError::Unavailable(e.to_string())),
        }
    }
}
