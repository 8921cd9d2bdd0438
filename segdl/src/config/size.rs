//! Human-readable byte sizes for configuration values.

use super::ConfigError;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Parses `"512KB"`, `"1 MB"`, `"2gb"` or a plain byte count.
///
/// Suffixes are binary (1 KB = 1024 bytes).
pub fn parse_size(value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "size".to_string(),
        value: value.to_string(),
        reason: "expected a byte count such as 1048576, 512KB or 1MB".to_string(),
    };

    let trimmed = value.trim().to_ascii_uppercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KB,
        "M" | "MB" | "MIB" => MB,
        "G" | "GB" | "GIB" => GB,
        _ => return Err(invalid()),
    };

    if number.contains('.') {
        let n: f64 = number.parse().map_err(|_| invalid())?;
        if !n.is_finite() || n < 0.0 {
            return Err(invalid());
        }
        Ok((n * multiplier as f64).round() as u64)
    } else {
        let n: u64 = number.parse().map_err(|_| invalid())?;
        n.checked_mul(multiplier).ok_or_else(invalid)
    }
}

/// Formats a byte count with the largest unit that divides it exactly, so
/// the result parses back to the same value.
pub fn format_size(bytes: u64) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GB == 0 => format!("{}GB", b / GB),
        b if b % MB == 0 => format!("{}MB", b / MB),
        b if b % KB == 0 => format!("{}KB", b / KB),
        b => b.to_string(),
    }
}

/// Formats a byte count for display, e.g. `1.5 MB`.
pub fn human_size(bytes: u64) -> String {
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
