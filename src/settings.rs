use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_LINE_API_URL: &str = "https://notify-api.line.me/api/notify";

fn default_smtp_port() -> u16 {
    587
}

/// SMTP relay coordinates for email delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailRelay {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// From address; the relay username is used when absent.
    #[serde(default)]
    pub sender: Option<String>,
}

/// Ambient configuration for the notification transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifySettings {
    pub line_api_url: String,
    pub email: Option<EmailRelay>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            line_api_url: DEFAULT_LINE_API_URL.into(),
            email: None,
        }
    }
}

impl NotifySettings {
    /// Load settings from a JSON file, falling back to defaults when the
    /// file is absent or does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read notify settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    /// Build settings from `SLOTWATCH_SMTP_*` environment variables, for
    /// hosts that configure the relay via the environment.
    pub fn from_env() -> Self {
        let email = match (
            env::var("SLOTWATCH_SMTP_HOST"),
            env::var("SLOTWATCH_SMTP_USER"),
            env::var("SLOTWATCH_SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(EmailRelay {
                host,
                port: default_smtp_port(),
                username,
                password,
                sender: env::var("SLOTWATCH_SMTP_SENDER").ok(),
            }),
            _ => None,
        };

        Self {
            line_api_url: DEFAULT_LINE_API_URL.into(),
            email,
        }
    }
}
