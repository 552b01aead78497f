//! A set of helpers for testing

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    config::{AlertRule, NotificationTarget},
    escalation::{Courier, CourierError},
    eval::{EvalError, EvalResult, Evaluator},
    models::TagSet,
};

/// An [`Evaluator`] returning canned results per expression text.
///
/// Expressions with no canned entry produce no results; expressions marked
/// failing produce an evaluation error. Results can be swapped between check
/// passes to script status transitions.
#[derive(Default)]
pub struct StaticEvaluator {
    results: Mutex<HashMap<String, Vec<EvalResult>>>,
    failing: Mutex<HashSet<String>>,
    fail_subjects: Mutex<bool>,
}

impl StaticEvaluator {
    /// Creates an evaluator with no canned results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the results the given expression evaluates to.
    pub fn set_results(&self, expression: &str, results: Vec<EvalResult>) {
        self.results.lock().insert(expression.to_string(), results);
        self.failing.lock().remove(expression);
    }

    /// Makes the given expression fail to evaluate.
    pub fn set_failing(&self, expression: &str) {
        self.failing.lock().insert(expression.to_string());
    }

    /// Makes every subject rendering fail.
    pub fn fail_subjects(&self, fail: bool) {
        *self.fail_subjects.lock() = fail;
    }
}

#[async_trait]
impl Evaluator for StaticEvaluator {
    type Cache = ();

    fn new_cache(&self) -> Self::Cache {}

    async fn evaluate(
        &self,
        expression: &str,
        _cache: &Self::Cache,
    ) -> Result<Vec<EvalResult>, EvalError> {
        if self.failing.lock().contains(expression) {
            return Err(EvalError::Evaluation(format!("canned failure for '{expression}'")));
        }
        Ok(self.results.lock().get(expression).cloned().unwrap_or_default())
    }

    async fn render_subject(
        &self,
        rule: &AlertRule,
        group: &TagSet,
        _cache: &Self::Cache,
    ) -> Result<String, EvalError> {
        if *self.fail_subjects.lock() {
            return Err(EvalError::Rendering("canned render failure".to_string()));
        }
        Ok(format!("{} triggered on {}", rule.name, group))
    }
}

/// A [`Courier`] that reports every delivery as a `mechanism:target:rule`
/// line on a channel, so tests can await and assert the delivery order.
pub struct ChannelCourier {
    sender: UnboundedSender<String>,
}

impl ChannelCourier {
    /// Creates a courier reporting deliveries on `sender`.
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }

    fn report(&self, mechanism: &str, target: &NotificationTarget, rule: &AlertRule) {
        // The receiver may be gone when a test only cares about state.
        let _ = self.sender.send(format!("{}:{}:{}", mechanism, target.name, rule.name));
    }
}

#[async_trait]
impl Courier for ChannelCourier {
    async fn send_email(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        _group: &TagSet,
        _subject: &str,
    ) -> Result<(), CourierError> {
        self.report("email", target, rule);
        Ok(())
    }

    async fn send_post(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        _group: &TagSet,
        _subject: &str,
    ) -> Result<(), CourierError> {
        self.report("post", target, rule);
        Ok(())
    }

    async fn send_get(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        _group: &TagSet,
        _subject: &str,
    ) -> Result<(), CourierError> {
        self.report("get", target, rule);
        Ok(())
    }

    async fn print(
        &self,
        rule: &AlertRule,
        target: &NotificationTarget,
        _group: &TagSet,
        _subject: &str,
    ) -> Result<(), CourierError> {
        self.report("print", target, rule);
        Ok(())
    }
}

/// Builds a result group from key/value pairs.
pub fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs.iter().map(|&(k, v)| (k, v)).collect()
}
