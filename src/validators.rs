//! Input validation and sanitization functions for pxfw
//!
//! Every string that ends up in the rule tool's argument vector passes
//! through here first. Rule grammar is left to iptables; these checks only
//! keep values from being read as options or from smuggling extra tokens.

use ipnetwork::IpNetwork;

/// Rejects values that could be parsed as a separate option or argument.
///
/// # Errors
///
/// Returns `Err` if the value is empty, starts with `-`, or contains
/// whitespace or control characters.
pub fn validate_token(input: &str) -> Result<&str, String> {
    if input.is_empty() {
        return Err("Value must not be empty".to_string());
    }

    // SECURITY: a leading dash would be taken as an iptables option
    if input.starts_with('-') {
        return Err("Value must not start with '-'".to_string());
    }

    if input.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("Value contains whitespace or control characters".to_string());
    }

    Ok(input)
}

/// Validates one entry of the redirect port list.
///
/// Accepts a single port or a `start:end` range as iptables multiport does.
/// Commas are rejected since the entries are joined with commas later.
///
/// # Errors
///
/// Returns `Err` if the entry is not a token, contains a comma, or is port 0.
pub fn validate_port_entry(input: &str) -> Result<&str, String> {
    validate_token(input)?;

    if input.contains(',') {
        return Err("Port entry must not contain ','".to_string());
    }

    // Numeric entries get a range check; service names go through unchanged
    if input.chars().all(|c| c.is_ascii_digit()) {
        match input.parse::<u16>() {
            Ok(0) | Err(_) => return Err("Port must be between 1 and 65535".to_string()),
            Ok(_) => {}
        }
    }

    Ok(input)
}

/// Validates a destination address used in an accept rule.
///
/// Anything that looks like an IP literal (digits and dots only, or
/// containing `:` or `/`) must parse as an address or CIDR network.
/// Everything else is treated as a hostname, which iptables resolves once
/// when the rule is inserted.
///
/// # Errors
///
/// Returns `Err` if an IP literal is malformed or a hostname contains
/// characters outside `[A-Za-z0-9._-]`.
pub fn validate_address(input: &str) -> Result<&str, String> {
    validate_token(input)?;

    let ip_like = input.contains([':', '/'])
        || input.chars().all(|c| c.is_ascii_digit() || c == '.');
    if ip_like {
        validate_network(input)?;
        return Ok(input);
    }

    if !input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Address contains invalid characters".to_string());
    }

    Ok(input)
}

/// Validates an exclusion entry: an IP address or CIDR network, never a
/// hostname.
///
/// # Errors
///
/// Returns `Err` if the value does not parse as an address or network.
pub fn validate_network(input: &str) -> Result<IpNetwork, String> {
    input
        .parse::<IpNetwork>()
        .map_err(|e| format!("Not an IP address or CIDR network: {e}"))
}
