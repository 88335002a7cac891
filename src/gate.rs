//! Notification throttle.
//!
//! `EventGate` decides whether a detection summary is worth a notification:
//! - nothing detected, no notification;
//! - at most one notification per minimum interval;
//! - a detection whose centroid barely moved since the last notification is
//!   the same event and is suppressed.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::detect::DetectionSummary;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MIN_DISTANCE: f32 = 50.0;

/// What the gate remembers about the last notification it let through.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotificationState {
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_centroid: Option<(f32, f32)>,
}

#[derive(Debug)]
pub struct EventGate {
    min_interval: chrono::Duration,
    min_distance: f32,
    state: NotificationState,
}

impl EventGate {
    pub fn new(min_interval: Duration, min_distance: f32) -> Self {
        Self {
            min_interval: chrono::Duration::from_std(min_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            min_distance,
            state: NotificationState::default(),
        }
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    /// Returns true when `summary` should be notified at `now`. State only
    /// changes when it returns true.
    pub fn should_notify<Tz: TimeZone>(
        &mut self,
        summary: &DetectionSummary,
        now: &DateTime<Tz>,
    ) -> bool {
        if !summary.has_object {
            return false;
        }
        let Some(first) = summary.items.first() else {
            return false;
        };
        let now = now.with_timezone(&Utc);

        if let Some(last_sent_at) = self.state.last_sent_at {
            if now - last_sent_at <= self.min_interval {
                return false;
            }
        }

        let centroid = first.representative_centroid;
        if let Some(last) = self.state.last_centroid {
            let distance = ((centroid.0 - last.0).powi(2) + (centroid.1 - last.1).powi(2)).sqrt();
            if distance < self.min_distance {
                log::info!(
                    "EventGate: suppressed duplicate {} ({:.1}px from last notification)",
                    first.label,
                    distance
                );
                return false;
            }
        }

        self.state.last_sent_at = Some(now);
        self.state.last_centroid = Some(centroid);
        true
    }
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL, DEFAULT_MIN_DISTANCE)
    }
}
