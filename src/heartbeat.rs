//! Half-hourly liveness ping.
//!
//! The heartbeat is due on the first evaluation inside a trigger window
//! (minute 0 or 30 of the hour) and never again until the clock leaves it.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike};

/// Minutes past the hour at which a heartbeat is due.
pub const HEARTBEAT_MINUTES: [u32; 2] = [0, 30];

/// Which trigger window the flag belongs to.
type WindowKey = (NaiveDate, u32, u32);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatState {
    pub sent_in_current_window: bool,
    window: Option<WindowKey>,
}

/// Wall-clock liveness ping: due once at minute 0 and once at minute 30 of
/// every hour, in the timezone of the timestamp passed in.
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    state: HeartbeatState,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &HeartbeatState {
        &self.state
    }

    pub fn is_due<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> bool {
        let minute = now.minute();
        if !HEARTBEAT_MINUTES.contains(&minute) {
            self.state = HeartbeatState::default();
            return false;
        }

        let key = (now.date_naive(), now.hour(), minute);
        if self.state.window != Some(key) {
            self.state.window = Some(key);
            self.state.sent_in_current_window = false;
        }
        if self.state.sent_in_current_window {
            return false;
        }
        self.state.sent_in_current_window = true;
        log::debug!(
            "HeartbeatScheduler: due for window {}-{:02}-{:02} {:02}:{:02}",
            key.0.year(),
            key.0.month(),
            key.0.day(),
            key.1,
            key.2
        );
        true
    }
}
