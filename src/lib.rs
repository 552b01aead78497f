//! Vigil is the alerting core of a time-series monitoring platform: a
//! recurring scheduler that evaluates alert rules against metric data, tracks
//! a state machine per alert instance, escalates unacknowledged critical
//! alerts through timed notification chains, and persists the whole table so
//! a restart resumes in-flight chains where they left off.
//!
//! The expression engine that actually queries metric backends is a
//! collaborator supplied by the embedding application through the
//! [`eval::Evaluator`] trait.

#![warn(missing_docs)]

pub mod config;
pub mod escalation;
pub mod eval;
pub mod models;
pub mod persistence;
pub mod sched;
pub mod state;
pub mod test_helpers;
