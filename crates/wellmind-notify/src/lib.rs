//! Notification eligibility and delivery engine.
//!
//! The pipeline: a job handler (or the reminder matcher) asks the
//! [`eligibility::EligibilityEngine`] whether a (user, type, context)
//! triple may be sent, then hands allowed sends to the
//! [`dispatcher::Dispatcher`], which renders the template, batches
//! messages to the [`gateway::PushGateway`], reconciles per-message
//! tickets, and persists exactly one notification record per logical
//! send.

pub mod catalog;
pub mod dispatcher;
pub mod eligibility;
pub mod error;
pub mod gateway;
pub mod reminder;


use std::collections::HashMap;

/// Caller-supplied context map, fed into template interpolation and
/// eligibility conditions (e.g. `{"mood": 3, "raining": true}`).
pub type Context = HashMap<String, serde_json::Value>;
