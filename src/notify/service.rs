use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use log::{error, info, warn};

use crate::models::NotifyMethod;
use crate::settings::{EmailRelay, NotifySettings};

use super::Notifier;

/// Production notifier: SMTP relay for email, LINE Notify for push.
pub struct NotificationService {
    http: reqwest::Client,
    settings: NotifySettings,
}

impl NotificationService {
    pub fn new(settings: NotifySettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> bool {
        let Some(relay) = &self.settings.email else {
            warn!("Email notification requested but no SMTP relay is configured");
            return false;
        };

        match deliver_email(relay, to, subject, body).await {
            Ok(()) => {
                info!("Email notification sent to {to}");
                true
            }
            Err(err) => {
                error!("Email notification to {to} failed: {err:?}");
                false
            }
        }
    }

    async fn send_line(&self, token: &str, body: &str) -> bool {
        let result = self
            .http
            .post(&self.settings.line_api_url)
            .bearer_auth(token)
            .form(&[("message", body)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("LINE notification sent");
                true
            }
            Ok(response) => {
                error!("LINE notification rejected with status {}", response.status());
                false
            }
            Err(err) => {
                error!("LINE notification failed: {err}");
                false
            }
        }
    }
}

async fn deliver_email(relay: &EmailRelay, to: &str, subject: &str, body: &str) -> Result<()> {
    let sender = relay.sender.as_deref().unwrap_or(&relay.username);
    let message = Message::builder()
        .from(sender.parse::<Mailbox>()?)
        .to(to.parse::<Mailbox>()?)
        .subject(subject)
        .body(body.to_string())?;

    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&relay.host)?
        .port(relay.port)
        .credentials(Credentials::new(
            relay.username.clone(),
            relay.password.clone(),
        ))
        .build();

    transport.send(message).await?;
    Ok(())
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(
        &self,
        method: NotifyMethod,
        address: Option<&str>,
        subject: &str,
        body: &str,
    ) -> bool {
        let Some(address) = address else {
            if method != NotifyMethod::None {
                warn!("{} notification requested without an address", method.as_str());
            }
            return false;
        };

        match method {
            NotifyMethod::Email => self.send_email(address, subject, body).await,
            NotifyMethod::Line => self.send_line(address, body).await,
            NotifyMethod::None => false,
        }
    }
}
