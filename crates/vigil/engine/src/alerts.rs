//! Alert emission and deduplication.
//!
//! At most one active (OPEN or ACKNOWLEDGED) alert exists per series.
//! Consecutive anomalous windows fold into it; it resolves only after
//! `cooldown_count` consecutive non-anomalous results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use vigil_types::{Alert, AlertEvent, AlertEventKind, AlertId, AlertState, ScoreResult, SeriesKey};

use crate::clock::Clock;
use crate::config::AlertingConfig;
use crate::error::{AlertError, AlertResult};

#[derive(Debug, Clone)]
struct ActiveAlert {
    alert: Alert,
    calm_streak: u32,
    last_notified: DateTime<Utc>,
}

/// Turns score results into alert transitions.
pub struct AlertEmitter {
    config: AlertingConfig,
    clock: Arc<dyn Clock>,
    active: DashMap<SeriesKey, ActiveAlert>,
}

impl AlertEmitter {
    pub fn new(config: AlertingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            active: DashMap::new(),
        }
    }

    /// Apply one score result to its series' alert.
    pub fn handle(&self, result: &ScoreResult) -> Option<AlertEvent> {
        let now = self.clock.now();

        if result.is_anomalous() {
            let mut entry = match self.active.entry(result.series.clone()) {
                Entry::Vacant(vacant) => {
                    let alert = Alert::open(
                        result.series.clone(),
                        result.window_start,
                        result.window_end,
                        result.score,
                    );
                    info!(
                        series = %result.series,
                        alert_id = %alert.id,
                        score = result.score,
                        window = %result.window_id,
                        "Alert opened"
                    );
                    vacant.insert(ActiveAlert {
                        alert: alert.clone(),
                        calm_streak: 0,
                        last_notified: now,
                    });
                    return Some(AlertEvent::new(AlertEventKind::Opened, alert));
                }
                Entry::Occupied(occupied) => occupied.into_ref(),
            };

            entry.calm_streak = 0;
            entry
                .alert
                .merge(result.window_start, result.window_end, result.score);

            let kind = if now - entry.last_notified >= self.config.renotify_interval() {
                entry.last_notified = now;
                info!(
                    series = %result.series,
                    alert_id = %entry.alert.id,
                    windows = entry.alert.anomalous_windows,
                    "Alert still active, renotifying"
                );
                AlertEventKind::Renotified
            } else {
                AlertEventKind::Updated
            };
            return Some(AlertEvent::new(kind, entry.alert.clone()));
        }

        let resolved = {
            let mut entry = self.active.get_mut(&result.series)?;
            entry.calm_streak += 1;
            debug!(
                series = %result.series,
                alert_id = %entry.alert.id,
                calm = entry.calm_streak,
                needed = self.config.cooldown_count,
                "Alert cooling down"
            );
            entry.calm_streak >= self.config.cooldown_count
        };

        if !resolved {
            return None;
        }

        let (_, mut active) = self.active.remove(&result.series)?;
        active.alert.state = AlertState::Resolved;
        active.alert.resolved_at = Some(result.window_end);
        info!(
            series = %result.series,
            alert_id = %active.alert.id,
            windows = active.alert.anomalous_windows,
            peak = active.alert.peak_score,
            "Alert resolved"
        );
        Some(AlertEvent::new(AlertEventKind::Resolved, active.alert))
    }

    /// Move an OPEN alert to ACKNOWLEDGED.
    pub fn acknowledge(&self, id: AlertId) -> AlertResult<AlertEvent> {
        let mut entry = self
            .active
            .iter_mut()
            .find(|e| e.alert.id == id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        if entry.alert.state != AlertState::Open {
            return Err(AlertError::InvalidTransition {
                id: id.to_string(),
                state: entry.alert.state.to_string(),
                action: "acknowledge",
            });
        }

        entry.alert.state = AlertState::Acknowledged;
        info!(series = %entry.alert.series, alert_id = %id, "Alert acknowledged");
        Ok(AlertEvent::new(
            AlertEventKind::Acknowledged,
            entry.alert.clone(),
        ))
    }

    /// The active alert of `series`, if any.
    pub fn active_alert(&self, series: &SeriesKey) -> Option<Alert> {
        self.active.get(series).map(|e| e.alert.clone())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.iter().map(|e| e.alert.clone()).collect()
    }
}
