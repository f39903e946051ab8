//! Human-readable byte sizes.

use crate::error::BlobError;

/// Parse a human-readable size into bytes.
///
/// Supports: `"100MB"`, `"1GB"`, `"512KB"`, `"1.5MB"`, `"42B"`, `"1048576"`
/// (raw bytes). Units are binary multiples and case-insensitive; `KiB`,
/// `MiB`, `GiB` and `TiB` are accepted as aliases.
pub fn parse_size(s: &str) -> Result<u64, BlobError> {
    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = [
        ("TIB", 1u64 << 40),
        ("GIB", 1 << 30),
        ("MIB", 1 << 20),
        ("KIB", 1 << 10),
        ("TB", 1 << 40),
        ("GB", 1 << 30),
        ("MB", 1 << 20),
        ("KB", 1 << 10),
        ("B", 1),
    ]
    .iter()
    .find_map(|(suffix, mult)| upper.strip_suffix(*suffix).map(|n| (n.trim(), *mult)))
    .unwrap_or((upper.as_str(), 1));

    let invalid = || BlobError::InvalidSize(s.to_string());
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let fractional: f64 = number.parse().map_err(|_| invalid())?;
    if !fractional.is_finite() || fractional < 0.0 {
        return Err(invalid());
    }
    let bytes = (fractional * multiplier as f64).round();
    if bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}
