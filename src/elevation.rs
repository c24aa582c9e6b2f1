//! Privilege elevation for the rule tool
//!
//! A transparent proxy usually runs as root, in which case the rule tool is
//! started directly. When it does not, the tool is wrapped in an elevation
//! helper:
//!
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **CLI fallback**: `sudo` when stdin is a terminal
//! - **Headless fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `PXFW_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//! - `PXFW_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! Arguments are passed as an argument vector, never through a shell.

use std::io;
use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `PXFW_ELEVATION_METHOD`
    #[error("Invalid PXFW_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Builds the command that runs `program` with `args`, elevated when needed.
///
/// With `elevate` false the program is always run directly, which is what
/// a proxy already running as root (or a test) wants.
///
/// # Errors
///
/// Returns `Err` if a forced method is unknown or unavailable, or if no
/// elevation helper can be found.
pub fn create_rule_command(
    program: &str,
    args: &[String],
    elevate: bool,
) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    if !elevate || std::env::var("PXFW_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    if let Ok(method) = std::env::var("PXFW_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    Ok(wrapped(&method, program, args))
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);

    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}
