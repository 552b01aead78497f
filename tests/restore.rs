//! Crash recovery: a restarted scheduler rebuilds its table from the state
//! file and resumes in-flight escalation chains with their original start
//! times, so a restart never resets a chain's clock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::mpsc;
use vigil::{
    config::{AlertRule, AppConfig, NotificationTarget, RuleSet},
    models::{AlertKey, Status},
    persistence,
    sched::Scheduler,
    state::AlertState,
    test_helpers::{ChannelCourier, StaticEvaluator, tags},
};

fn target(name: &str, next: Option<&str>, timeout: Duration) -> NotificationTarget {
    NotificationTarget {
        name: name.to_string(),
        emails: vec![],
        post: None,
        get: None,
        print: true,
        next: next.map(str::to_string),
        timeout,
    }
}

fn rules() -> RuleSet {
    let rule = AlertRule {
        name: "cpu.high".to_string(),
        crit: Some("crit_expr".to_string()),
        warn: None,
        subject: None,
        squelch: vec![],
        notifications: vec!["oncall".to_string()],
    };
    let targets = vec![
        target("oncall", Some("team"), Duration::from_secs(300)),
        target("team", None, Duration::ZERO),
    ];
    let notifications: HashMap<_, _> = targets.into_iter().map(|t| (t.name.clone(), t)).collect();
    RuleSet { alerts: vec![rule], notifications }
}

fn scheduler(
    state_file: std::path::PathBuf,
) -> (Arc<Scheduler<StaticEvaluator>>, mpsc::UnboundedReceiver<String>) {
    let config = AppConfig { state_file, ..AppConfig::default() };
    let (tx, rx) = mpsc::unbounded_channel();
    let sched = Arc::new(Scheduler::new(
        config,
        Arc::new(StaticEvaluator::new()),
        Arc::new(ChannelCourier::new(tx)),
    ));
    (sched, rx)
}

/// Writes a snapshot holding one critical `cpu.high` state whose `pending`
/// chain steps are as given.
fn write_snapshot(path: &std::path::Path, pending: &[(&str, chrono::DateTime<Utc>)]) -> AlertKey {
    let group = tags(&[("host", "a")]);
    let state = AlertState::new(group.clone(), Vec::new());
    state.append(Status::Critical);
    for (step, started) in pending {
        assert!(state.register_pending(step, *started));
    }
    let key = AlertKey::new("cpu.high", &group);
    let mut table = std::collections::BTreeMap::new();
    table.insert(key.clone(), Arc::new(state));
    persistence::save_table(path, &table).unwrap();
    key
}

#[tokio::test]
async fn restart_rebuilds_the_table_from_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.state");
    let group = tags(&[("host", "a")]);

    // Drive one key critical, then checkpoint.
    let evaluator = Arc::new(StaticEvaluator::new());
    evaluator.set_results("crit_expr", vec![vigil::eval::EvalResult::new(group.clone(), 1.0)]);
    let config = AppConfig { state_file: path.clone(), ..AppConfig::default() };
    let (tx, _rx) = mpsc::unbounded_channel();
    let first = Arc::new(Scheduler::new(config, evaluator, Arc::new(ChannelCourier::new(tx))));
    first.load(rules()).await;
    first.check().await;
    first.save().await;

    let (second, _deliveries) = scheduler(path);
    second.load(rules()).await;

    let record = second
        .state_record(&AlertKey::new("cpu.high", &group))
        .await
        .expect("state survived the restart");
    assert_eq!(record.history.last().unwrap().status, Status::Critical);
    assert!(!record.acknowledged);
    assert_eq!(record.group, group);
}

#[tokio::test(start_paused = true)]
async fn resumed_chain_waits_only_the_remaining_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.state");
    // The chain started 250 s before the crash; 50 s of the 300 s timeout
    // remain.
    write_snapshot(&path, &[("oncall", Utc::now() - chrono::Duration::seconds(250))]);

    let (scheduler, mut deliveries) = scheduler(path);
    let before = tokio::time::Instant::now();
    scheduler.load(rules()).await;

    assert_eq!(deliveries.recv().await.as_deref(), Some("print:team:cpu.high"));
    let waited = before.elapsed();
    assert!(waited >= Duration::from_secs(45), "waited {waited:?}");
    assert!(waited < Duration::from_secs(300), "restart must not reset the chain clock");
}

#[tokio::test(start_paused = true)]
async fn acknowledgment_still_stops_a_resumed_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.state");
    let key = write_snapshot(&path, &[("oncall", Utc::now())]);

    let (scheduler, mut deliveries) = scheduler(path);
    scheduler.load(rules()).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(scheduler.acknowledge(&key).await);
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(deliveries.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stale_pending_steps_are_dropped_and_the_rest_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.state");
    let key = write_snapshot(
        &path,
        &[
            ("decommissioned", Utc::now() - chrono::Duration::seconds(10)),
            ("oncall", Utc::now() - chrono::Duration::seconds(299)),
        ],
    );

    let (scheduler, mut deliveries) = scheduler(path);
    scheduler.load(rules()).await;

    // Only the still-configured step resumes and escalates.
    assert_eq!(deliveries.recv().await.as_deref(), Some("print:team:cpu.high"));
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(deliveries.try_recv().is_err());

    let record = scheduler.state_record(&key).await.expect("state restored");
    assert!(!record.acknowledged);
}

#[tokio::test]
async fn acknowledged_snapshot_state_resumes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vigil.state");
    let group = tags(&[("host", "a")]);
    let state = AlertState::new(group.clone(), Vec::new());
    state.append(Status::Critical);
    state.acknowledge();
    let key = AlertKey::new("cpu.high", &group);
    let mut table = std::collections::BTreeMap::new();
    table.insert(key.clone(), Arc::new(state));
    persistence::save_table(&path, &table).unwrap();

    let (scheduler, mut deliveries) = scheduler(path);
    scheduler.load(rules()).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let record = scheduler.state_record(&key).await.expect("state restored");
    assert!(record.acknowledged);
    assert!(deliveries.try_recv().is_err());
}
