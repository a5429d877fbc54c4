//! Resource quantity parsing.
//!
//! CPU is expressed in fractional-core units ("300m" = 0.3 core); memory
//! and ephemeral storage are byte quantities with binary suffixes
//! (Ki, Mi, Gi, Ti). Suffixes are matched case-insensitively.

use crate::errors::{KataboxError, KataboxResult};

/// Parse a CPU quantity into millicores.
///
/// Accepts `"300m"`, whole cores (`"2"`), and fractional cores (`"0.5"`).
pub fn parse_cpu_millis(value: &str) -> KataboxResult<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(KataboxError::Validation("empty cpu quantity".into()));
    }

    let millis = if let Some(num) = value.strip_suffix(['m', 'M']) {
        num.parse::<u64>()
            .map_err(|_| invalid("cpu", value))?
    } else if let Ok(cores) = value.parse::<u64>() {
        cores
            .checked_mul(1_000)
            .ok_or_else(|| invalid("cpu", value))?
    } else {
        let cores: f64 = value.parse().map_err(|_| invalid("cpu", value))?;
        if !cores.is_finite() || cores < 0.0 {
            return Err(invalid("cpu", value));
        }
        (cores * 1_000.0).round() as u64
    };

    if millis == 0 {
        return Err(KataboxError::Validation(format!(
            "cpu quantity '{}' must be positive",
            value
        )));
    }
    Ok(millis)
}

/// Parse a memory or storage quantity into bytes.
///
/// Accepts binary suffixes (`"512Mi"`, `"1Gi"`) and plain byte counts.
pub fn parse_bytes(value: &str) -> KataboxResult<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(KataboxError::Validation("empty byte quantity".into()));
    }

    let lower = value.to_ascii_lowercase();
    let (num, multiplier) = if let Some(num) = lower.strip_suffix("ki") {
        (num, 1u64 << 10)
    } else if let Some(num) = lower.strip_suffix("mi") {
        (num, 1u64 << 20)
    } else if let Some(num) = lower.strip_suffix("gi") {
        (num, 1u64 << 30)
    } else if let Some(num) = lower.strip_suffix("ti") {
        (num, 1u64 << 40)
    } else {
        (lower.as_str(), 1u64)
    };

    let count: u64 = num.trim().parse().map_err(|_| invalid("byte", value))?;
    let bytes = count
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("byte", value))?;

    if bytes == 0 {
        return Err(KataboxError::Validation(format!(
            "byte quantity '{}' must be positive",
            value
        )));
    }
    Ok(bytes)
}

fn invalid(kind: &str, value: &str) -> KataboxError {
    KataboxError::Validation(format!("invalid {} quantity '{}'", kind, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_millicores() {
        assert_eq!(parse_cpu_millis("300m").unwrap(), 300);
        assert_eq!(parse_cpu_millis("1m").unwrap(), 1);
    }

    #[test]
    fn test_cpu_whole_and_fractional_cores() {
        assert_eq!(parse_cpu_millis("2").unwrap(), 2_000);
        assert_eq!(parse_cpu_millis("0.5").unwrap(), 500);
        assert_eq!(parse_cpu_millis("0.3").unwrap(), 300);
    }

    #[test]
    fn test_cpu_rejects_garbage() {
        assert!(parse_cpu_millis("").is_err());
        assert!(parse_cpu_millis("lots").is_err());
        assert!(parse_cpu_millis("-1").is_err());
        assert!(parse_cpu_millis("0").is_err());
        assert!(parse_cpu_millis("0m").is_err());
    }

    #[test]
    fn test_bytes_binary_suffixes() {
        assert_eq!(parse_bytes("1Ki").unwrap(), 1_024);
        assert_eq!(parse_bytes("512Mi").unwrap(), 512 * 1_024 * 1_024);
        assert_eq!(parse_bytes("1Gi").unwrap(), 1 << 30);
        assert_eq!(parse_bytes("2Ti").unwrap(), 2u64 << 40);
        // Case-insensitive, as accepted on input
        assert_eq!(parse_bytes("1gi").unwrap(), 1 << 30);
    }

    #[test]
    fn test_bytes_plain() {
        assert_eq!(parse_bytes("1048576").unwrap(), 1_048_576);
    }

    #[test]
    fn test_bytes_rejects_garbage() {
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("many").is_err());
        assert!(parse_bytes("-1Gi").is_err());
        assert!(parse_bytes("0Mi").is_err());
    }
}
