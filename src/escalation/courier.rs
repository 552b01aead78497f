//! The stock courier: HTTP POST/GET delivery via `reqwest`, email via an
//! async SMTP relay, and console printing.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use super::{Courier, CourierError};
use crate::{
    config::{AlertRule, NotificationTarget, SmtpConfig},
    models::TagSet,
};

struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Default [`Courier`] implementation. Email delivery requires SMTP settings;
/// without them `send_email` fails with [`CourierError::NoMailer`] while the
/// other mechanisms keep working.
pub struct StdCourier {
    client: reqwest::Client,
    mailer: Option<Mailer>,
}

impl StdCourier {
    /// Builds the courier, wiring an SMTP relay when settings are present.
    pub fn new(smtp: Option<&SmtpConfig>) -> Result<Self, CourierError> {
        let mailer = match smtp {
            Some(cfg) => {
                let from = cfg
                    .from
                    .parse::<Mailbox>()
                    .map_err(|e| CourierError::Email(format!("invalid sender address: {e}")))?;
                let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                    .map_err(|e| CourierError::Email(e.to_string()))?
                    .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
                    .port(cfg.port)
                    .build();
                Some(Mailer { transport, from })
            }
            None => None,
        };
        Ok(Self { client: reqwest::Client::new(), mailer })
    }

    fn payload(rule: &AlertRule, group: &TagSet, subject: &str) -> serde_json::Value {
        serde_json::json!({
            "alert": rule.name,
            "group": group,
            "subject": subject,
        })
    }

    fn subject_line(rule: &AlertRule, group: &TagSet, subject: &str) -> String {
        if subject.is_empty() { format!("{}{}", rule.name, group) } else { subject.to_string() }
    }
}

#[async_trait]
impl Courier for StdCourier {
    async fn send_email(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError> {
        let Some(mailer) = &self.mailer else {
            return Err(CourierError::NoMailer);
        };
        let subject_line = Self::subject_line(rule, group, subject);
        for addr in &target.emails {
            let to = addr
                .parse::<Mailbox>()
                .map_err(|e| CourierError::Email(format!("invalid recipient '{addr}': {e}")))?;
            let email = Message::builder()
                .from(mailer.from.clone())
                .to(to)
                .subject(subject_line.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(format!("{}\n\nalert: {}\ngroup: {}", subject_line, rule.name, group))
                .map_err(|e| CourierError::Email(e.to_string()))?;
            mailer.transport.send(email).await.map_err(|e| CourierError::Email(e.to_string()))?;
        }
        Ok(())
    }

    async fn send_post(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError> {
        let Some(url) = &target.post else {
            return Ok(());
        };
        self.client
            .post(url.clone())
            .json(&Self::payload(rule, group, subject))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_get(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        _subject: &str,
    ) -> Result<(), CourierError> {
        let Some(url) = &target.get else {
            return Ok(());
        };
        tracing::debug!(rule = %rule.name, target = %target.name, group = %group, "GET notification");
        self.client.get(url.clone()).send().await?.error_for_status()?;
        Ok(())
    }

    async fn print(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError> {
        println!("[{}] {} {}", target.name, rule.name, Self::subject_line(rule, group, subject));
        Ok(())
    }
}
