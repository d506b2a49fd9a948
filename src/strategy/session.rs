// src/strategy/session.rs
use chrono::{DateTime, Timelike, Utc};

/// Filters entries to the enabled trading sessions. Session windows are in
/// UTC; London and New York intentionally overlap.
pub struct SessionFilter {
    include_asian: bool,
    include_london: bool,
    include_new_york: bool,
}

impl SessionFilter {
    pub fn new(include_asian: bool, include_london: bool, include_new_york: bool) -> Self {
        Self {
            include_asian,
            include_london,
            include_new_york,
        }
    }

    pub fn is_in_active_session(&self, timestamp: DateTime<Utc>) -> bool {
        let hour = timestamp.hour();

        // Asian 00:00-09:00, London 08:00-17:00, New York 13:00-22:00 UTC
        let is_asian = hour < 9;
        let is_london = (8..17).contains(&hour);
        let is_new_york = (13..22).contains(&hour);

        (self.include_asian && is_asian)
            || (self.include_london && is_london)
            || (self.include_new_york && is_new_york)
    }
}
