//! The escalation engine: delivers notifications for triggered alerts and
//! re-arms itself on a timeout until the alert is acknowledged, the chain is
//! exhausted, or delivery is cancelled.
//!
//! Chains are fire-and-forget tasks with a logging side channel only; a
//! failed delivery never propagates back into the scheduler.

mod courier;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

pub use courier::StdCourier;

use crate::{
    config::{AlertRule, NotificationTarget, RuleSet},
    models::TagSet,
    state::AlertState,
};

/// Errors a delivery mechanism can surface. All of them are logged and
/// dropped by the escalation engine.
#[derive(Debug, Error)]
pub enum CourierError {
    /// An HTTP POST or GET delivery failed.
    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An email delivery failed.
    #[error("email delivery failed: {0}")]
    Email(String),

    /// Email delivery was requested but no SMTP relay is configured.
    #[error("no SMTP relay configured")]
    NoMailer,
}

/// Side-effecting delivery hooks invoked by the escalation engine. Concrete
/// transports live behind this trait; [`StdCourier`] is the stock
/// implementation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Courier: Send + Sync {
    /// Sends the alert to the target's email recipients.
    async fn send_email(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError>;

    /// POSTs an alert payload to the target's URL.
    async fn send_post(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError>;

    /// GETs the target's URL.
    async fn send_get(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError>;

    /// Prints the alert to the console.
    async fn print(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        group: &TagSet,
        subject: &str,
    ) -> Result<(), CourierError>;
}

/// A delivery mechanism enabled on a notification target.
#[derive(Debug, Clone, Copy)]
enum Mechanism {
    Email,
    Post,
    Get,
    Print,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mechanism::Email => "email",
            Mechanism::Post => "post",
            Mechanism::Get => "get",
            Mechanism::Print => "print",
        };
        f.write_str(s)
    }
}

/// Drives notification chains for triggered alert states.
#[derive(Clone)]
pub struct Escalator {
    courier: Arc<dyn Courier>,
}

impl Escalator {
    /// Creates an escalation engine delivering through the given courier.
    pub fn new(courier: Arc<dyn Courier>) -> Self {
        Self { courier }
    }

    /// Starts one escalation chain for a freshly critical state,
    /// fire-and-forget.
    pub fn start_chain(
        &self,
        rules: Arc<RuleSet>,
        state: Arc<AlertState>,
        rule_name: String,
        target_name: String,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            this.notify(rules, state, rule_name, target_name).await;
        });
    }

    /// Resumes a persisted chain step, honoring its original start time so
    /// only the remaining portion of the timeout is waited.
    pub fn resume_chain(
        &self,
        rules: Arc<RuleSet>,
        state: Arc<AlertState>,
        rule_name: String,
        target_name: String,
        started: DateTime<Utc>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            this.add_notification(rules, state, rule_name, target_name, started).await;
        });
    }

    /// Fires every enabled delivery mechanism on the target concurrently,
    /// then registers the chain continuation if the target has a follow-up
    /// step and the alert is still unacknowledged.
    async fn notify(
        &self,
        rules: Arc<RuleSet>,
        state: Arc<AlertState>,
        rule_name: String,
        target_name: String,
    ) {
        let Some(rule) = rules.alert(&rule_name) else {
            tracing::warn!(rule = %rule_name, "alert rule missing, dropping notification");
            return;
        };
        let Some(target) = rules.notification(&target_name) else {
            tracing::warn!(target = %target_name, "notification target missing, dropping notification");
            return;
        };

        let group = state.group();
        let subject = state.subject();

        let mut mechanisms = Vec::new();
        if !target.emails.is_empty() {
            mechanisms.push(Mechanism::Email);
        }
        if target.post.is_some() {
            mechanisms.push(Mechanism::Post);
        }
        if target.get.is_some() {
            mechanisms.push(Mechanism::Get);
        }
        if target.print {
            mechanisms.push(Mechanism::Print);
        }

        for mechanism in mechanisms {
            let courier = Arc::clone(&self.courier);
            let rule = rule.clone();
            let target = target.clone();
            let group = group.clone();
            let subject = subject.clone();
            tokio::spawn(async move {
                let result = match mechanism {
                    Mechanism::Email => courier.send_email(&rule, &target, &group, &subject).await,
                    Mechanism::Post => courier.send_post(&rule, &target, &group, &subject).await,
                    Mechanism::Get => courier.send_get(&rule, &target, &group, &subject).await,
                    Mechanism::Print => courier.print(&rule, &target, &group, &subject).await,
                };
                if let Err(e) = result {
                    tracing::error!(
                        rule = %rule.name,
                        target = %target.name,
                        mechanism = %mechanism,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            });
        }

        // The acknowledged bit is checked here, not left to the token alone:
        // a zero-timeout step must not re-arm against an already-settled
        // alert.
        if target.next.is_none() || state.acknowledged() {
            return;
        }
        self.add_notification(Arc::clone(&rules), state, rule_name, target_name, Utc::now()).await;
    }

    /// Waits out one chain step: whichever comes first of the state's
    /// cancellation signal (chain ends) or the remaining portion of the
    /// step's timeout (chain continues with the successor target).
    ///
    /// At most one waiter per step name runs at a time; a duplicate
    /// registration is dropped without disturbing the incumbent's timer.
    async fn add_notification(
        &self,
        rules: Arc<RuleSet>,
        state: Arc<AlertState>,
        rule_name: String,
        target_name: String,
        started: DateTime<Utc>,
    ) {
        let Some(target) = rules.notification(&target_name) else {
            tracing::warn!(target = %target_name, "notification target missing, dropping chain");
            return;
        };
        if !state.register_pending(&target_name, started) {
            tracing::debug!(
                target = %target_name,
                "escalation step already pending, not starting a second waiter"
            );
            return;
        }
        let Some(cancel) = state.cancel_token() else {
            // Acknowledged between the trigger and this registration.
            state.clear_pending(&target_name);
            return;
        };

        let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
        let remaining = target.timeout.saturating_sub(elapsed);

        // Biased: an already-fired signal must win even against a zero or
        // fully elapsed timeout.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(remaining) => {
                if let Some(next) = &target.next {
                    self.start_chain(Arc::clone(&rules), Arc::clone(&state), rule_name, next.clone());
                }
            }
        }
        state.clear_pending(&target_name);
    }
}
