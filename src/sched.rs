//! The recurring scheduler: evaluates every alert rule on a fixed cadence,
//! drives the per-key state machines, starts escalation chains on fresh
//! critical transitions, and checkpoints the table to disk.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::{
    config::{AlertRule, AppConfig, RuleSet, serialize_duration_to_seconds},
    escalation::{Courier, Escalator},
    eval::Evaluator,
    models::{AlertKey, Status},
    persistence,
    state::{AlertState, StateRecord},
};

/// The shortest evaluation cadence the scheduler accepts.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// The shortest snapshot cadence the scheduler accepts.
pub const MIN_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Fatal scheduler startup errors. Everything past startup is
/// recoverable-and-logged.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The configured check interval is below [`MIN_CHECK_INTERVAL`].
    #[error("check interval {0:?} is below the 1s minimum")]
    IntervalTooShort(Duration),

    /// The configured save interval is below [`MIN_SAVE_INTERVAL`].
    #[error("save interval {0:?} is below the 1s minimum")]
    SaveIntervalTooShort(Duration),

    /// `run` was called before any rule configuration was loaded.
    #[error("no rule configuration loaded")]
    NoRules,
}

/// Read-only view of the scheduler for status display: the loaded rules, the
/// evaluation cadence, and every currently abnormal alert state.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    /// Alert rules in definition order.
    pub alerts: Vec<AlertRule>,
    /// Seconds between evaluation passes.
    #[serde(serialize_with = "serialize_duration_to_seconds")]
    pub check_interval: Duration,
    /// States at warning or above, by alert key string.
    pub status: BTreeMap<String, StateRecord>,
}

/// The alerting core. One instance owns the full alert-state table and the
/// evaluation, escalation and persistence loops over it.
///
/// The table lock is held for a whole evaluation pass, so a pass always sees
/// and produces a consistent table; escalation chains run outside the lock
/// and synchronize through the per-state machinery instead.
pub struct Scheduler<E: Evaluator> {
    config: AppConfig,
    evaluator: Arc<E>,
    escalator: Escalator,
    rules: parking_lot::Mutex<Option<Arc<RuleSet>>>,
    table: tokio::sync::Mutex<BTreeMap<AlertKey, Arc<AlertState>>>,
}

impl<E: Evaluator> Scheduler<E> {
    /// Creates a scheduler delivering notifications through the given
    /// courier. No rules are loaded yet; call [`load`](Self::load) before
    /// [`run`](Self::run).
    pub fn new(config: AppConfig, evaluator: Arc<E>, courier: Arc<dyn Courier>) -> Self {
        Self {
            config,
            evaluator,
            escalator: Escalator::new(courier),
            rules: parking_lot::Mutex::new(None),
            table: tokio::sync::Mutex::new(BTreeMap::new()),
        }
    }

    /// Installs a validated rule configuration, then restores the persisted
    /// alert states and resumes their in-flight escalation chains against
    /// the new rules.
    pub async fn load(&self, rules: RuleSet) {
        *self.rules.lock() = Some(Arc::new(rules));
        self.restore_state().await;
    }

    /// Runs the scheduler forever: a snapshot loop on the save interval and
    /// an evaluation pass every check interval, the first one a full
    /// interval after startup.
    ///
    /// A pass that overruns the interval delays subsequent ticks rather than
    /// bursting to catch up.
    pub async fn run(self: Arc<Self>) -> Result<(), SchedulerError> {
        if self.config.check_interval < MIN_CHECK_INTERVAL {
            return Err(SchedulerError::IntervalTooShort(self.config.check_interval));
        }
        // tokio's interval panics on a zero period, and the panic would land
        // in the detached snapshot task where nothing observes it.
        if self.config.save_interval < MIN_SAVE_INTERVAL {
            return Err(SchedulerError::SaveIntervalTooShort(self.config.save_interval));
        }
        if self.rules.lock().is_none() {
            return Err(SchedulerError::NoRules);
        }

        let saver = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(saver.config.save_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                saver.save().await;
            }
        });

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let started = Instant::now();
            self.check().await;
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "check pass done");
        }
    }

    /// Runs one evaluation pass over every rule, in definition order, against
    /// a fresh metric-data cache.
    pub async fn check(&self) {
        let Some(rules) = self.rules.lock().clone() else {
            return;
        };
        let cache = self.evaluator.new_cache();
        let mut table = self.table.lock().await;
        for rule in &rules.alerts {
            self.check_alert(&mut table, &rules, rule, &cache).await;
        }
    }

    /// Evaluates one rule: the critical expression first, then the warning
    /// expression with every key the critical expression fired for excluded,
    /// so a key critical this pass is never downgraded by its warning
    /// result.
    async fn check_alert(
        &self,
        table: &mut BTreeMap<AlertKey, Arc<AlertState>>,
        rules: &Arc<RuleSet>,
        rule: &AlertRule,
        cache: &E::Cache,
    ) {
        let mut crit_fired = Vec::new();
        if let Some(crit) = &rule.crit {
            crit_fired =
                self.check_expression(table, rules, rule, crit, Status::Critical, &[], cache).await;
        }
        if let Some(warn) = &rule.warn {
            self.check_expression(table, rules, rule, warn, Status::Warning, &crit_fired, cache)
                .await;
        }
    }

    /// Evaluates one expression at one severity and feeds every result group
    /// through its state machine. Returns the keys that fired (evaluated
    /// non-zero), for use as the warning pass's exclusion list.
    ///
    /// A failing expression skips this rule for this pass only.
    async fn check_expression(
        &self,
        table: &mut BTreeMap<AlertKey, Arc<AlertState>>,
        rules: &Arc<RuleSet>,
        rule: &AlertRule,
        expression: &str,
        severity: Status,
        exclude: &[AlertKey],
        cache: &E::Cache,
    ) -> Vec<AlertKey> {
        let results = match self.evaluator.evaluate(expression, cache).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(rule = %rule.name, severity = %severity, error = %e, "expression evaluation failed, skipping rule this pass");
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for result in results {
            if rule.squelched(&result.group) {
                tracing::debug!(rule = %rule.name, group = %result.group, "group squelched");
                continue;
            }
            let key = AlertKey::new(&rule.name, &result.group);
            if exclude.contains(&key) {
                continue;
            }
            let state = table
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(AlertState::new(result.group.clone(), result.computations.clone()))
                });
            let status = if result.value == 0.0 { Status::Normal } else { severity };
            let should_escalate = state.append(status);
            if status != Status::Normal {
                let subject = match self.evaluator.render_subject(rule, &result.group, cache).await
                {
                    Ok(subject) => Some(subject),
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, group = %result.group, error = %e, "subject rendering failed, keeping previous subject");
                        None
                    }
                };
                state.set_context(expression, subject);
                fired.push(key.clone());
            }
            if should_escalate {
                tracing::info!(key = %key, "alert critical, starting escalation");
                for target in &rule.notifications {
                    self.escalator.start_chain(
                        Arc::clone(rules),
                        Arc::clone(state),
                        rule.name.clone(),
                        target.clone(),
                    );
                }
            }
        }
        fired
    }

    /// Checkpoints the whole table to the configured state file.
    pub async fn save(&self) {
        let table = self.table.lock().await;
        match persistence::save_table(&self.config.state_file, &table) {
            Ok(()) => {
                tracing::debug!(path = %self.config.state_file.display(), states = table.len(), "state saved")
            }
            Err(e) => {
                tracing::error!(path = %self.config.state_file.display(), error = %e, "state save failed")
            }
        }
    }

    /// Rebuilds the table from the persisted snapshot and resumes every
    /// pending escalation step whose rule and target still exist, honoring
    /// each step's original start time.
    ///
    /// Replaces the current table; any state already in it is acknowledged
    /// first so its chain waiters drain.
    async fn restore_state(&self) {
        let Some(rules) = self.rules.lock().clone() else {
            return;
        };
        let mut table = self.table.lock().await;
        for state in table.values() {
            state.acknowledge();
        }
        table.clear();

        let records = match persistence::load_records(&self.config.state_file) {
            Ok(records) => records,
            Err(crate::persistence::PersistenceError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::info!(path = %self.config.state_file.display(), "no state file, starting fresh");
                return;
            }
            Err(e) => {
                tracing::error!(path = %self.config.state_file.display(), error = %e, "state restore failed, starting fresh");
                return;
            }
        };

        for (key, record) in records {
            let state = Arc::new(AlertState::from_record(&record));
            for (target_name, started) in &record.pending {
                if rules.alert(&key.name).is_none() {
                    tracing::warn!(key = %key, "persisted alert rule no longer configured, dropping its pending chain");
                    continue;
                }
                if rules.notification(target_name).is_none() {
                    tracing::warn!(key = %key, target = %target_name, "persisted notification target no longer configured, dropping pending step");
                    continue;
                }
                self.escalator.resume_chain(
                    Arc::clone(&rules),
                    Arc::clone(&state),
                    key.name.clone(),
                    target_name.clone(),
                    *started,
                );
            }
            table.insert(key, state);
        }
        tracing::info!(states = table.len(), "alert state restored");
    }

    /// Acknowledges the alert at `key`, stopping its escalation chains.
    /// Returns false when the key is unknown.
    pub async fn acknowledge(&self, key: &AlertKey) -> bool {
        let table = self.table.lock().await;
        match table.get(key) {
            Some(state) => {
                state.acknowledge();
                tracing::info!(key = %key, "alert acknowledged");
                true
            }
            None => false,
        }
    }

    /// Builds the read-only status view: every state currently at warning or
    /// above. Normal states stay in the table but are not shown.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let rules = self.rules.lock().clone();
        let table = self.table.lock().await;
        let status = table
            .iter()
            .filter(|(_, state)| state.current_status() >= Status::Warning)
            .map(|(key, state)| (key.to_string(), state.record()))
            .collect();
        StatusSnapshot {
            alerts: rules.map(|r| r.alerts.clone()).unwrap_or_default(),
            check_interval: self.config.check_interval,
            status,
        }
    }

    /// Returns a copy of one key's state record, if the key exists.
    pub async fn state_record(&self, key: &AlertKey) -> Option<StateRecord> {
        self.table.lock().await.get(key).map(|state| state.record())
    }
}
