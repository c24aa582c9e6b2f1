use nix::sys::signal::Signal;
use thiserror::Error;

/// Core error types for pxfw
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an incomplete or unsafe configuration
    #[error("Invalid input in {field}: {message}")]
    InvalidInput { field: String, message: String },

    /// The rule tool could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The rule tool ran but did not exit normally with status 0
    #[error("iptables error: {message}")]
    Tool {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Waiting on the rule tool failed
    #[error("Failed to reap rule tool: {0}")]
    Wait(#[source] std::io::Error),

    /// An interrupt signal arrived while a rule was pending
    #[error("Interrupted by {signal} while a rule was pending")]
    Interrupted { signal: Signal },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),
}

impl Error {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Maps the error onto the small result code handed back to callers.
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::InvalidInput { .. } => Outcome::InvalidInput,
            Error::Interrupted { .. } => Outcome::SignalReceived,
            Error::Spawn { .. }
            | Error::Tool { .. }
            | Error::Wait(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Elevation(_) => Outcome::Fatal,
        }
    }
}

/// Result code of an apply/revert call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(i32)]
pub enum Outcome {
    #[strum(serialize = "none")]
    None = 0,
    #[strum(serialize = "invalid-input")]
    InvalidInput = 1,
    #[strum(serialize = "fatal")]
    Fatal = 2,
    #[strum(serialize = "signal-received")]
    SignalReceived = 3,
}

impl Outcome {
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl<T> From<&Result<T>> for Outcome {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::None,
            Err(e) => e.outcome(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known iptables failure messages and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify NAT rules")
                .with_suggestion("Run pxfw as root, or enable elevation in the config")
                .with_suggestion("Check that CAP_NET_ADMIN is available to the process");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables-nft  (Fedora/RHEL)")
                .with_suggestion("Or point PXFW_IPTABLES_COMMAND at the binary");
        }

        // xtables lock held by another iptables invocation
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Another process holds the iptables lock")
                .with_suggestion("Another firewall manager may be modifying rules")
                .with_suggestion("Wait a moment and try again");
        }

        if lower.contains("bad rule") || lower.contains("does a matching rule exist") {
            return ErrorTranslation::new("Rule to delete was not found")
                .with_suggestion("The rules may already have been reverted")
                .with_suggestion("Inspect current rules: sudo iptables -t nat -S OUTPUT");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match module not available")
                .with_suggestion("Load NAT support: sudo modprobe iptable_nat")
                .with_suggestion("Check the configured chain name exists in the nat table");
        }

        if lower.contains("multiport") || lower.contains("needs `-p tcp'") {
            return ErrorTranslation::new("Port redirection needs a tcp or udp listener")
                .with_suggestion("Multiport matching is not available with protocol 'all'");
        }

        if lower.contains("host/network") && lower.contains("not found") {
            return ErrorTranslation::new("Address could not be resolved")
                .with_suggestion("Use a literal IP address for the proxy server and exclusions");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -t nat -L")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
