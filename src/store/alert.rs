//! Periodic alert rule evaluation.
//!
//! Each tick every rule goes IDLE -> evaluating -> FIRING (one alert per
//! stream whose condition holds) and back to IDLE at the next tick. There is
//! no pending period and no resolve step; a rule re-fires every tick while
//! its condition holds.

use crate::config::types::{AlertRuleConfig, AlertingConfig, ConditionConfig};
use crate::labels::LabelSet;
use crate::metrics::{incr, StoreCounters};
use crate::store::index::{StreamIndex, TimeRange};
use crate::store::selector::{Selector, SelectorError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ALERTNAME_LABEL: &str = "alertname";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// Entries in the window strictly above `threshold`
    CountOverTime { window: Duration, threshold: f64 },
    /// Entries per second over the window strictly above `threshold`
    Rate { window: Duration, threshold: f64 },
}

impl Condition {
    pub fn window(&self) -> Duration {
        match self {
            Condition::CountOverTime { window, .. } | Condition::Rate { window, .. } => *window,
        }
    }

    fn threshold(&self) -> f64 {
        match self {
            Condition::CountOverTime { threshold, .. } | Condition::Rate { threshold, .. } => *threshold,
        }
    }

    /// Observed value for `count` entries within the window.
    pub fn value(&self, count: usize) -> f64 {
        match self {
            Condition::CountOverTime { .. } => count as f64,
            Condition::Rate { window, .. } => {
                let secs = window.as_secs_f64();
                if secs > 0.0 {
                    count as f64 / secs
                } else {
                    0.0
                }
            }
        }
    }

    pub fn holds(&self, value: f64) -> bool {
        value > self.threshold()
    }
}

impl From<&ConditionConfig> for Condition {
    fn from(config: &ConditionConfig) -> Self {
        match *config {
            ConditionConfig::CountOverTime { window, threshold } => Condition::CountOverTime { window, threshold },
            ConditionConfig::Rate { window, threshold } => Condition::Rate { window, threshold },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub selector: Selector,
    pub condition: Condition,
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub require_labels: Vec<String>,
}

impl AlertRule {
    pub fn from_config(config: &AlertRuleConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            name: config.alert.clone(),
            selector: Selector::parse(&config.selector)?,
            condition: Condition::from(&config.condition),
            labels: config.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            annotations: config.annotations.clone(),
            require_labels: config.require_labels.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub rule: String,
    pub labels: LabelSet,
    pub annotations: BTreeMap<String, String>,
    pub value: f64,
    pub fired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Idle,
    Firing,
}

/// Alerts of the most recent evaluation round.
#[derive(Debug, Default)]
pub struct AlertBoard {
    latest: RwLock<Vec<Alert>>,
}

impl AlertBoard {
    pub fn replace(&self, alerts: Vec<Alert>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = alerts;
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    states: Vec<RuleState>,
    interval: Duration,
    index: Arc<StreamIndex>,
    board: Arc<AlertBoard>,
    sink: mpsc::Sender<Alert>,
    counters: Arc<StoreCounters>,
}

impl AlertEvaluator {
    pub fn new(
        config: &AlertingConfig,
        index: Arc<StreamIndex>,
        board: Arc<AlertBoard>,
        sink: mpsc::Sender<Alert>,
        counters: Arc<StoreCounters>,
    ) -> Result<Self, SelectorError> {
        let rules = config
            .rules
            .iter()
            .map(AlertRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            states: vec![RuleState::Idle; rules.len()],
            rules,
            interval: config.interval,
            index,
            board,
            sink,
            counters,
        })
    }

    /// State each rule was left in by the last round.
    pub fn rule_states(&self) -> Vec<(String, RuleState)> {
        self.rules
            .iter()
            .zip(&self.states)
            .map(|(rule, state)| (rule.name.clone(), *state))
            .collect()
    }

    /// Evaluate every rule against the index as of `now`.
    pub fn evaluate_once(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for (rule, state) in self.rules.iter().zip(self.states.iter_mut()) {
            let fired = evaluate_rule(rule, &self.index, &self.counters, now);
            *state = if fired.is_empty() {
                RuleState::Idle
            } else {
                debug!(rule = %rule.name, alerts = fired.len(), "Rule firing");
                RuleState::Firing
            };
            alerts.extend(fired);
        }

        alerts
    }

    /// Evaluate on every tick until cancelled, publishing each round to the
    /// board and the alert channel.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(rules = self.rules.len(), interval_ms = self.interval.as_millis() as u64, "Starting alert evaluator");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let alerts = self.evaluate_once(Utc::now());
            self.board.replace(alerts.clone());

            for alert in alerts {
                incr(&self.counters.alerts_fired);
                match self.sink.try_send(alert) {
                    Ok(()) => {}
                    Err(TrySendError::Full(alert)) => {
                        warn!(rule = %alert.rule, "Alert channel full, dropping alert");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Alert channel closed");
                    }
                }
            }
        }
        info!("Alert evaluator stopped");
    }
}

fn evaluate_rule(rule: &AlertRule, index: &StreamIndex, counters: &StoreCounters, now: DateTime<Utc>) -> Vec<Alert> {
    let window = chrono::Duration::from_std(rule.condition.window()).unwrap_or_else(|_| chrono::Duration::zero());
    let range = TimeRange::new(now.checked_sub_signed(window), now.checked_add_signed(chrono::Duration::nanoseconds(1)));

    let mut alerts = Vec::new();
    for stream in index.select(&rule.selector) {
        let value = rule.condition.value(stream.count_in(&range));
        if !rule.condition.holds(value) {
            continue;
        }

        let mut labels = stream.labels().clone();
        // The stream's own labels take precedence over rule labels
        labels.merge_missing(&rule.labels);
        labels.insert(ALERTNAME_LABEL, rule.name.clone());

        let missing = labels.missing(&rule.require_labels);
        if !missing.is_empty() {
            warn!(
                rule = %rule.name,
                stream = %stream.fingerprint(),
                missing = ?missing,
                "Alert lacks required labels, not emitted"
            );
            incr(&counters.alerts_suppressed);
            continue;
        }

        alerts.push(Alert {
            rule: rule.name.clone(),
            labels,
            annotations: rule.annotations.clone(),
            value,
            fired_at: now,
        });
    }
    alerts
}
