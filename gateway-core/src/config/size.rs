//! Size and byte-rate string parsing, e.g. `"120kib/s"`, `"1 GiB"`.
//!
//! Units are case-insensitive; the `iB` suffix (binary, 1024-based) is
//! optional — `kb` and `kib` both mean 1024 bytes, matching the behavior the
//! upstream project's `speed` strings rely on. Rate strings carry an
//! optional `/s` (default), `/m`, or `/h` suffix.

const UNITS: &[(&str, u64)] = &[
    ("k", 1024),
    ("m", 1024 * 1024),
    ("g", 1024 * 1024 * 1024),
    ("t", 1024u64 * 1024 * 1024 * 1024),
];

/// Parses a plain size string like `"1 GiB"`, `"64"`, `"512kb"` into bytes.
pub fn parse_size_bytes(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let lower = s.to_ascii_lowercase().replace(' ', "");
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(lower.len());
    let (num, rest) = lower.split_at(digits_end);
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid numeric size {num:?}"))?;

    if rest.is_empty() || rest == "b" {
        return Ok(value as u64);
    }

    let unit_letter = &rest[0..1];
    let multiplier = UNITS
        .iter()
        .find(|(u, _)| *u == unit_letter)
        .map(|(_, m)| *m)
        .ok_or_else(|| format!("unknown size unit {rest:?}"))?;

    let trailer = &rest[1..];
    if !(trailer.is_empty() || trailer == "b" || trailer == "ib") {
        return Err(format!("unknown size suffix {rest:?}"));
    }

    Ok((value * multiplier as f64) as u64)
}

/// Parses a byte-per-second rate string like `"120kib/s"`, `"2m/m"`,
/// `"1gib/h"` into bytes/second. No suffix after the slash defaults to `/s`.
pub fn parse_rate_bytes_per_sec(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty rate string".into());
    }
    let (size_part, period) = match s.rsplit_once('/') {
        Some((size, period)) => (size, period),
        None => (s, "s"),
    };
    let bytes = parse_size_bytes(size_part)? as f64;
    let period_secs: f64 = match period.to_ascii_lowercase().as_str() {
        "s" | "sec" | "second" => 1.0,
        "m" | "min" | "minute" => 60.0,
        "h" | "hour" => 3600.0,
        other => return Err(format!("unknown rate period {other:?}")),
    };
    Ok(bytes / period_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size_bytes("512").unwrap(), 512);
    }

    #[test]
    fn parses_binary_units_case_insensitively() {
        assert_eq!(parse_size_bytes("1GiB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size_bytes("1gib").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size_bytes("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size_bytes("1g").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parses_rate_with_period_suffix() {
        assert_eq!(
            parse_rate_bytes_per_sec("120kib/s").unwrap(),
            120.0 * 1024.0
        );
        assert_eq!(parse_rate_bytes_per_sec("60kib/m").unwrap(), 1024.0);
    }

    #[test]
    fn defaults_rate_period_to_seconds() {
        assert_eq!(parse_rate_bytes_per_sec("1kib").unwrap(), 1024.0);
    }
}
