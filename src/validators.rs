//! Input validation and parsing helpers
//!
//! Centralizes validation of the textual forms that reach the crate from the
//! control plane: port ranges in `min:max` notation and kernel interface
//! names.

use crate::core::model::PortRange;

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Parses a port range in `"80"` or `"80:90"` notation.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either bound fails to parse as a port number
/// - Either bound is 0
/// - The lower bound exceeds the upper bound
///
/// # Examples
///
/// ```
/// use l3fw::validators::parse_port_range;
///
/// let single = parse_port_range("22").unwrap();
/// assert_eq!((single.start, single.end), (22, 22));
///
/// let range = parse_port_range("8000:9000").unwrap();
/// assert_eq!((range.start, range.end), (8000, 9000));
///
/// assert!(parse_port_range("9000:8000").is_err());
/// assert!(parse_port_range("http").is_err());
/// ```
pub fn parse_port_range(input: &str) -> Result<PortRange, String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .map_err(|_| format!("Invalid port number: {s}"))
            .and_then(validate_port)
    };

    match input.split_once(':') {
        Some((lo, hi)) => {
            let start = parse(lo)?;
            let end = parse(hi)?;
            if start > end {
                return Err("Start port must be less than or equal to end port".to_string());
            }
            Ok(PortRange { start, end })
        }
        None => {
            let port = parse(input)?;
            Ok(PortRange::single(port))
        }
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` if the name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<&str, String> {
    if name.is_empty() {
        return Err("Interface name must not be empty".to_string());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    // ASCII alphanumeric only, plus dot, dash, underscore
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name)
}
