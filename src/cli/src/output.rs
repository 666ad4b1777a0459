//! Human-readable rendering of store and transfer results.

use a3s_model_core::Digest;
use chrono::{DateTime, Utc};
use comfy_table::{presets, ContentArrangement, Table};

/// Columns of the `list` table.
pub const MODEL_COLUMNS: [&str; 4] = ["NAME", "TAG", "SIZE", "MODIFIED"];

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Borderless table of local models, one row per manifest.
pub fn model_table<R>(rows: impl IntoIterator<Item = R>) -> Table
where
    R: Into<comfy_table::Row>,
{
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(MODEL_COLUMNS);
    for row in rows {
        table.add_row(row);
    }
    table
}

/// Binary-prefixed size with one decimal, plain bytes below 1 KB.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, SIZE_UNITS[unit])
    }
}

/// Age of `then` relative to `now` in its largest whole unit.
pub fn age(then: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(*then);
    let days = elapsed.num_days();
    let (count, unit) = match elapsed.num_seconds() {
        s if s < 1 => return "just now".to_string(),
        s if s < 60 => (s, "second"),
        _ if elapsed.num_minutes() < 60 => (elapsed.num_minutes(), "minute"),
        _ if elapsed.num_hours() < 24 => (elapsed.num_hours(), "hour"),
        _ if days < 30 => (days, "day"),
        _ if days < 365 => (days / 30, "month"),
        _ => (days / 365, "year"),
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} ago", count, unit, plural)
}

/// `sha256:` plus the first 12 hex characters.
pub fn short_digest(digest: &Digest) -> String {
    let hex = digest.hex();
    format!("{}:{}", digest.algorithm(), &hex[..hex.len().min(12)])
}
