/// Formatting helpers shared by the dashboard and the CLI

use chrono::{DateTime, Utc};

/// Shown wherever a value is absent
pub const ABSENT: &str = "-";

/// Compact binary-unit rendering for table cells: 585M, 4.94G, 41.9G, 12K.
///
/// Precision drops as the value grows within a unit; kilo values are whole numbers.
pub fn auto_unit(number: f64) -> String {
    const PREFIXES: &[(char, f64)] = &[
        ('E', 1_152_921_504_606_846_976.0),
        ('P', 1_125_899_906_842_624.0),
        ('T', 1_099_511_627_776.0),
        ('G', 1_073_741_824.0),
        ('M', 1_048_576.0),
        ('K', 1024.0),
    ];

    for &(symbol, prefix) in PREFIXES {
        let value = number / prefix;
        if value > 1.0 {
            let precision = match symbol {
                'K' => 0,
                _ if value < 10.0 => 2,
                _ if value < 100.0 => 1,
                _ => 0,
            };
            return format!("{value:.precision$}{symbol}");
        }
    }

    format!("{number:.0}")
}

/// Largest whole unit elapsed between `then` and `now`, e.g. "3 hours ago"
pub fn format_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);

    let (count, unit) = match seconds {
        s if s >= 86400 => (s / 86400, "day"),
        s if s >= 3600 => (s / 3600, "hour"),
        s if s >= 60 => (s / 60, "minute"),
        s => (s, "second"),
    };

    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Truncate string with ellipsis
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// First 12 characters of a container id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Render `value` with `f`, or the absent marker
pub fn or_absent<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> String {
    value.map(f).unwrap_or_else(|| ABSENT.to_string())
}
