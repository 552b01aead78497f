//! The seam between the alerting core and the external expression engine.
//!
//! The engine that parses rule expressions and queries metric backends is an
//! external collaborator; the scheduler only requires the [`Evaluator`]
//! contract defined here. The metric-data cache is an opaque handle produced
//! fresh for each check pass and threaded unmodified through evaluation and
//! subject rendering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::AlertRule, models::TagSet};

/// One step of the diagnostic trace an evaluation produces for a result
/// group, captured for display alongside the alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    /// The (sub)expression that was computed.
    pub text: String,
    /// The numeric value it produced.
    pub value: f64,
}

/// The outcome of evaluating one expression for one result group.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    /// The label set identifying the group.
    pub group: TagSet,
    /// The numeric result; exactly zero means the group is normal.
    pub value: f64,
    /// Diagnostic trace of how the value was computed.
    pub computations: Vec<Computation>,
}

impl EvalResult {
    /// Builds a result with an empty diagnostic trace.
    pub fn new(group: TagSet, value: f64) -> Self {
        Self { group, value, computations: Vec::new() }
    }
}

/// Errors the expression engine can surface. All of them are
/// recoverable-and-logged from the scheduler's point of view: a failing
/// expression skips one rule for one pass, nothing more.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The expression could not be evaluated against the cache.
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),

    /// The alert subject template could not be rendered.
    #[error("subject rendering failed: {0}")]
    Rendering(String),

    /// The metric backend could not be reached.
    #[error("metric backend unavailable: {0}")]
    Backend(String),
}

/// Contract for the external expression engine.
///
/// `evaluate` must be pure with respect to the supplied cache snapshot: the
/// scheduler calls it repeatedly within a pass and across passes, always with
/// the cache handle created by `new_cache` at the start of the pass.
#[async_trait]
pub trait Evaluator: Send + Sync + 'static {
    /// Opaque per-pass metric-data cache handle.
    type Cache: Send + Sync + 'static;

    /// Creates a fresh cache handle for one check pass.
    fn new_cache(&self) -> Self::Cache;

    /// Evaluates an expression against the cache, returning one numeric
    /// result per matching group.
    async fn evaluate(
        &self,
        expression: &str,
        cache: &Self::Cache,
    ) -> Result<Vec<EvalResult>, EvalError>;

    /// Renders the rule's subject line for a specific group.
    async fn render_subject(
        &self,
        rule: &AlertRule,
        group: &TagSet,
        cache: &Self::Cache,
    ) -> Result<String, EvalError>;
}
