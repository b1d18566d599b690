use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineSettings, NotifyPolicy};
use crate::mail::{SmtpSettings, SmtpTls};

/// Server configuration, read from `RESERVD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Relay for outgoing mail. Unset means mail is only logged.
    pub smtp: Option<SmtpSettings>,
    pub engine: EngineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let num = |key: &str| get(key).and_then(|s| s.parse::<u64>().ok());
        let defaults = EngineSettings::default();

        let notify_policy = match get("RESERVD_NOTIFY_POLICY") {
            Some(s) => s.parse::<NotifyPolicy>()?,
            None => defaults.notify_policy,
        };

        let smtp = match get("RESERVD_SMTP_HOST") {
            Some(host) => {
                let tls = match get("RESERVD_SMTP_TLS") {
                    Some(s) => s.parse::<SmtpTls>()?,
                    None => SmtpTls::StartTls,
                };
                let credentials = get("RESERVD_SMTP_USERNAME")
                    .map(|user| (user, get("RESERVD_SMTP_PASSWORD").unwrap_or_default()));
                Some(SmtpSettings {
                    host,
                    port: get("RESERVD_SMTP_PORT")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(587),
                    tls,
                    credentials,
                })
            }
            None => None,
        };

        Ok(Self {
            bind: get("RESERVD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: get("RESERVD_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(7433),
            data_dir: PathBuf::from(get("RESERVD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: num("RESERVD_MAX_CONNECTIONS").map_or(256, |n| n as usize),
            compact_threshold: num("RESERVD_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: get("RESERVD_METRICS_PORT").and_then(|s| s.parse().ok()),
            smtp,
            engine: EngineSettings {
                notify_policy,
                reserve_timeout: num("RESERVD_RESERVE_TIMEOUT_MS")
                    .map_or(defaults.reserve_timeout, Duration::from_millis),
                mail_timeout: num("RESERVD_MAIL_TIMEOUT_MS")
                    .map_or(defaults.mail_timeout, Duration::from_millis),
                mail_from: get("RESERVD_MAIL_FROM").unwrap_or(defaults.mail_from),
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservd.wal")
    }
}
