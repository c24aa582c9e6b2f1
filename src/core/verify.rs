//! Rule presence checks
//!
//! `iptables -C` exits 0 when the rule exists and 1 when it does not. Any
//! other failure is a real error and is passed through.

use crate::core::error::{Error, Result};
use crate::core::rules::RuleSpec;

/// Presence of one apply-time rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStatus {
    pub rule: RuleSpec,
    pub present: bool,
}

/// Result of checking every apply-time rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub rules: Vec<RuleStatus>,
}

impl StatusReport {
    /// True if every rule is in the table (and there is at least one)
    pub fn fully_applied(&self) -> bool {
        !self.rules.is_empty() && self.rules.iter().all(|s| s.present)
    }

    /// True if none of the rules are in the table
    pub fn fully_reverted(&self) -> bool {
        self.rules.iter().all(|s| !s.present)
    }

    pub fn missing(&self) -> impl Iterator<Item = &RuleSpec> {
        self.rules.iter().filter(|s| !s.present).map(|s| &s.rule)
    }
}

/// Turns the result of a check-mode execution into presence.
///
/// # Errors
///
/// Returns the original error unless it is the tool's "rule absent" exit.
pub fn classify_check(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::Tool {
            exit_code: Some(1), ..
        }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Splits tool stderr into clean messages
///
/// Drops blank lines and the common `iptables: ` / `iptables vX.Y.Z: `
/// prefixes so messages read well on their own.
pub fn parse_tool_errors(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let line = line.strip_prefix("iptables: ").unwrap_or(line);
            match line.strip_prefix("iptables v") {
                Some(rest) => rest
                    .split_once(": ")
                    .map_or(line, |(_, message)| message)
                    .to_string(),
                None => line.to_string(),
            }
        })
        .collect()
}
