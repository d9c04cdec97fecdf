//! Input validation and sanitization functions for routemgr
//!
//! This module provides centralized validation for all user inputs to prevent
//! injection attacks and ensure data integrity before anything reaches the
//! facility command line.

/// Sanitizes a record name for safe display and logging.
///
/// Removes control characters, quotes, and shell metacharacters.
/// Limits length to 64 bytes (ASCII characters only).
///
/// SECURITY: Uses `is_ascii_alphanumeric()` to prevent Unicode-based bypasses
/// and ensure names stay within system limits (64 bytes max).
///
/// # Examples
///
/// ```
/// use routemgr::validators::sanitize_name;
///
/// let safe = sanitize_name("Office VPN");
/// assert_eq!(safe, "Office VPN");
///
/// let unsafe_name = "Test\nNewline\"Quote";
/// let safe = sanitize_name(unsafe_name);
/// assert!(!safe.contains('\n'));
/// assert!(!safe.contains('"'));
/// ```
pub fn sanitize_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            // SECURITY: Use ASCII-only to prevent Unicode bypasses and multi-byte issues
            c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ':')
        })
        .take(64)
        .collect()
}

/// Validates and sanitizes a record name.
///
/// # Errors
///
/// Returns `Err` if:
/// - Name exceeds 64 characters
/// - Name becomes empty after sanitization (all invalid chars)
#[allow(dead_code)]
pub fn validate_name(input: &str) -> Result<String, String> {
    if input.len() > 64 {
        return Err("Name too long (max 64 characters)".to_string());
    }

    let sanitized = sanitize_name(input);

    if sanitized.is_empty() && !input.is_empty() {
        return Err("Name contains only invalid characters".to_string());
    }

    Ok(sanitized)
}

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

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// An empty name is accepted (the field is optional in several records).
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Ok(String::new());
    }

    if name.len() > 15 {
        return Err("Interface name too long (max 15 characters)".to_string());
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    // Check for valid characters (ASCII alphanumeric only, plus dot, dash, underscore)
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates a route metric.
///
/// # Errors
///
/// Returns `Err` if the metric exceeds 65535; kernels accept larger values
/// but nothing the manager generates should need one.
pub fn validate_metric(metric: u32) -> Result<u32, String> {
    if metric > 65_535 {
        Err("Metric exceeds maximum (65535)".to_string())
    } else {
        Ok(metric)
    }
}

/// Checks if a port is well-known and returns informational message.
///
/// This is informational only and does not block saving.
pub fn check_well_known_port(port: u16) -> Option<String> {
    if port <= 1024 {
        let name = match port {
            22 => "SSH",
            80 => "HTTP",
            443 => "HTTPS",
            53 => "DNS",
            25 => "SMTP",
            21 => "FTP",
            _ => return Some(format!("Privileged port {} (requires admin)", port)),
        };
        Some(format!("Port {}: {}", port, name))
    } else {
        None
    }
}

/// Checks if an IP is in a reserved range and returns informational warning.
///
/// This is informational only and does not block saving.
/// Helps users understand if they're targeting private/special ranges.
pub fn check_reserved_ip(ip: ipnetwork::IpNetwork) -> Option<String> {
    use std::net::IpAddr;

    match ip.ip() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            // RFC 1918 private ranges
            if octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
            {
                return Some("Private IP range (RFC 1918) - usually safe for LAN".to_string());
            }

            // Loopback
            if octets[0] == 127 {
                return Some("Loopback range (127.x) - loopback traffic is always allowed".to_string());
            }

            // Link-local
            if octets[0] == 169 && octets[1] == 254 {
                return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) - loopback traffic is always allowed".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) - local network only".to_string());
            }

            None
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_sanitize_name_never_exceeds_64_chars(input in "\\PC*") {
            let sanitized = sanitize_name(&input);
            prop_assert!(sanitized.len() <= 64);
        }

        #[test]
        fn test_sanitize_name_no_control_chars(input in "\\PC*") {
            let sanitized = sanitize_name(&input);
            prop_assert!(!sanitized.chars().any(char::is_control));
        }

        #[test]
        fn test_sanitize_name_no_dangerous_chars(input in "\\PC*") {
            let sanitized = sanitize_name(&input);
            prop_assert!(!sanitized.contains('"'));
            prop_assert!(!sanitized.contains('\''));
            prop_assert!(!sanitized.contains('$'));
            prop_assert!(!sanitized.contains('`'));
            prop_assert!(!sanitized.contains('|'));
            prop_assert!(!sanitized.contains('&'));
            prop_assert!(!sanitized.contains(';'));
        }

        #[test]
        fn test_validate_port_rejects_zero(port in any::<u16>()) {
            let result = validate_port(port);
            if port == 0 {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
                prop_assert_eq!(result.unwrap(), port);
            }
        }

        #[test]
        fn test_validate_port_range_consistency(
            start in 1u16..=65535,
            end in 1u16..=65535
        ) {
            let result = validate_port_range(start, end);
            if start <= end {
                prop_assert!(result.is_ok());
                let (s, e) = result.unwrap();
                prop_assert_eq!(s, start);
                prop_assert_eq!(e, end);
            } else {
                prop_assert!(result.is_err());
            }
        }

        #[test]
        fn test_validate_interface_length_constraint(name in "[a-zA-Z0-9._-]{0,20}") {
            let result = validate_interface(&name);
            if name.len() <= 15 && name != "." && name != ".." {
                prop_assert!(result.is_ok());
            } else if name.len() > 15 {
                prop_assert!(result.is_err());
            }
        }

        #[test]
        fn test_validate_interface_char_constraint(
            valid_prefix in "[a-zA-Z0-9._-]{1,10}",
            invalid_char in "[^a-zA-Z0-9._-]"
        ) {
            let invalid_name = format!("{valid_prefix}{invalid_char}");
            let result = validate_interface(&invalid_name);
            prop_assert!(result.is_err());
        }
    }
}
