use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a stored UTC timestamp in the portal's display zone.
pub fn as_local_string(utc: DateTime<Utc>, zone: Tz) -> String {
    utc.with_timezone(&zone).format(DISPLAY_FORMAT).to_string()
}
