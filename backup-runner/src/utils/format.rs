//! Human-readable formatting for rates and durations.

/// Format a bytes-per-second rate as human-readable string.
/// Takes f64 because rates are derived from counter deltas over a float interval.
pub fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: &[&str] = &["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];
    let mut rate = bytes_per_second.max(0.0);
    let mut unit_index = 0;

    while rate >= 1024.0 && unit_index < UNITS.len() - 1 {
        rate /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", rate, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
