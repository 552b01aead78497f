//! The per-alert state machine: status history, acknowledgment, escalation
//! cancellation, and in-flight chain bookkeeping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    eval::Computation,
    models::{Event, Status, TagSet},
};

/// Mutable state for one [`AlertKey`](crate::models::AlertKey).
///
/// The evaluation pass mutates the core data while holding the scheduler's
/// table-wide lock; escalation-chain tasks run outside that lock and touch
/// only the cancellation token and the pending-step bookkeeping. Two
/// per-state mutexes keep those uses apart, and neither is ever held across
/// an await point.
#[derive(Debug)]
pub struct AlertState {
    data: Mutex<StateData>,
    /// Notification-step name to the UTC time its chain started. Guarded
    /// separately so chain tasks never contend with the evaluation pass.
    pending: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

#[derive(Debug, Default)]
struct StateData {
    history: Vec<Event>,
    touched_at: DateTime<Utc>,
    expression: String,
    subject: String,
    group: TagSet,
    computations: Vec<Computation>,
    acknowledged: bool,
    cancel: Option<CancellationToken>,
}

/// The serializable mirror of an [`AlertState`]: everything except the live
/// cancellation token. Used for the persisted snapshot and the read-only
/// status view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Status change events, oldest first; the last entry is current.
    pub history: Vec<Event>,
    /// Time of the last evaluation that observed this key.
    pub touched_at: DateTime<Utc>,
    /// Text of the expression that last found the key abnormal.
    #[serde(default)]
    pub expression: String,
    /// Rendered subject line captured at the last abnormal evaluation.
    #[serde(default)]
    pub subject: String,
    /// The result group this state tracks.
    #[serde(default)]
    pub group: TagSet,
    /// Diagnostic trace captured when the state was created.
    #[serde(default)]
    pub computations: Vec<Computation>,
    /// True when no escalation should be running.
    pub acknowledged: bool,
    /// In-flight notification steps and their chain start times.
    #[serde(default)]
    pub pending: BTreeMap<String, DateTime<Utc>>,
}

impl AlertState {
    /// Creates the state for a key observed for the first time.
    pub fn new(group: TagSet, computations: Vec<Computation>) -> Self {
        Self {
            data: Mutex::new(StateData {
                group,
                computations,
                acknowledged: true,
                touched_at: Utc::now(),
                ..StateData::default()
            }),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records an observation. Appends an event only when the status differs
    /// from the latest recorded one; repeated identical observations leave
    /// the history untouched.
    ///
    /// On a transition the prior cancellation token, if any, is fired before
    /// it is replaced, so waiters from an earlier episode always drain: a
    /// key flapping critical-normal-critical can never leave two live
    /// tokens. A transition into [`Status::Critical`] arms a fresh token and
    /// clears the acknowledgment; every other transition acknowledges.
    ///
    /// Returns true exactly when the transition landed on critical, i.e.
    /// when escalation should start.
    pub fn append(&self, status: Status) -> bool {
        let mut data = self.data.lock();
        data.touched_at = Utc::now();
        if data.history.last().map(|e| e.status) == Some(status) {
            return false;
        }
        data.history.push(Event { status, time: Utc::now() });
        if let Some(prev) = data.cancel.take() {
            prev.cancel();
        }
        data.acknowledged = status != Status::Critical;
        if !data.acknowledged {
            data.cancel = Some(CancellationToken::new());
        }
        status == Status::Critical
    }

    /// Acknowledges the alert, firing the cancellation signal and stopping
    /// every escalation waiter. Idempotent: a second call is a no-op and the
    /// token is never fired twice.
    pub fn acknowledge(&self) {
        let mut data = self.data.lock();
        if data.acknowledged {
            return;
        }
        data.acknowledged = true;
        if let Some(token) = data.cancel.take() {
            token.cancel();
        }
    }

    /// Returns whether the alert is acknowledged.
    pub fn acknowledged(&self) -> bool {
        self.data.lock().acknowledged
    }

    /// Returns a clone of the active cancellation token, present only while
    /// the state is unacknowledged.
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.data.lock().cancel.clone()
    }

    /// The most recent event, if the key has ever been evaluated.
    pub fn last(&self) -> Option<Event> {
        self.data.lock().history.last().copied()
    }

    /// The current severity; `Normal` for a never-evaluated state.
    pub fn current_status(&self) -> Status {
        self.last().map(|e| e.status).unwrap_or_default()
    }

    /// The result group this state tracks.
    pub fn group(&self) -> TagSet {
        self.data.lock().group.clone()
    }

    /// The most recently rendered subject line.
    pub fn subject(&self) -> String {
        self.data.lock().subject.clone()
    }

    /// Captures diagnostic context at an abnormal evaluation. The expression
    /// text is always replaced; the subject only when rendering succeeded,
    /// so a render failure keeps the previous subject.
    pub fn set_context(&self, expression: &str, subject: Option<String>) {
        let mut data = self.data.lock();
        data.expression = expression.to_string();
        if let Some(subject) = subject {
            data.subject = subject;
        }
    }

    /// Registers a notification step as pending, first writer wins. Returns
    /// false without touching the recorded start time when the step is
    /// already pending; the caller must then not start a second waiter.
    pub fn register_pending(&self, step: &str, started: DateTime<Utc>) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(step) {
            return false;
        }
        pending.insert(step.to_string(), started);
        true
    }

    /// Clears a step's pending-bookkeeping entry once its waiter finishes.
    pub fn clear_pending(&self, step: &str) {
        self.pending.lock().remove(step);
    }

    /// Snapshot of the pending-step bookkeeping.
    pub fn pending(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.pending.lock().clone()
    }

    /// Copies the state into its serializable mirror.
    pub fn record(&self) -> StateRecord {
        let data = self.data.lock();
        StateRecord {
            history: data.history.clone(),
            touched_at: data.touched_at,
            expression: data.expression.clone(),
            subject: data.subject.clone(),
            group: data.group.clone(),
            computations: data.computations.clone(),
            acknowledged: data.acknowledged,
            pending: self.pending.lock().clone(),
        }
    }

    /// Rebuilds a state from a persisted record. An unacknowledged record
    /// gets a fresh cancellation token so resumed chain waiters have a
    /// signal to watch. The recorded pending entries are *not* installed:
    /// the restore path re-registers each resumable step through
    /// [`register_pending`](Self::register_pending), which also drops
    /// entries whose configuration no longer exists.
    pub fn from_record(record: &StateRecord) -> Self {
        let cancel = (!record.acknowledged).then(CancellationToken::new);
        Self {
            data: Mutex::new(StateData {
                history: record.history.clone(),
                touched_at: record.touched_at,
                expression: record.expression.clone(),
                subject: record.subject.clone(),
                group: record.group.clone(),
                computations: record.computations.clone(),
                acknowledged: record.acknowledged,
                cancel,
            }),
            pending: Mutex::new(BTreeMap::new()),
        }
    }
}
