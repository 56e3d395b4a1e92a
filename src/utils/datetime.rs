use chrono::{DateTime, Utc};

/// Timestamp as shown to admins, e.g. `2024-03-01 10:30 UTC`.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}
