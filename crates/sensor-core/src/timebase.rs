use std::time::{SystemTime, UNIX_EPOCH};

/// Digits after the decimal point in a posix timestamp string.
pub const TS_DECIMALS: usize = 6;

/// Wall-clock microseconds since Unix epoch.
pub fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Wall-clock seconds since Unix epoch with microsecond precision,
/// e.g. `1704067200.123456`.
pub fn posix_timestamp() -> String {
    format_posix_us(unix_us())
}

pub fn format_posix_us(unix_us: u64) -> String {
    format!(
        "{}.{:0width$}",
        unix_us / 1_000_000,
        unix_us % 1_000_000,
        width = TS_DECIMALS
    )
}
