//! On-disk configuration
//!
//! A single JSON file describes the proxy (upstream server, redirect ports,
//! local listener) and how rules are run. [`FileConfig`] converts into the
//! runtime types: [`ProxyHandler`], [`RuleBuilder`] and [`ExecutorConfig`].

use crate::core::builder::{DEFAULT_EXCLUSIONS, RuleBuilder};
use crate::core::error::{Error, Result};
use crate::core::executor::{DEFAULT_PROGRAM, DEFAULT_REAP_GRACE, ExecutorConfig};
use crate::core::rules::{HandlerConfig, Listener, NAT_TABLE, OUTPUT_CHAIN, ProxyHandler};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// Upstream proxy server address
    #[serde(default)]
    pub proxy_server: Option<String>,
    /// Destination ports to redirect to the listener
    #[serde(default)]
    pub redirect_ports: Vec<String>,
    /// Local listener; without it nothing can be applied
    #[serde(default)]
    pub listener: Option<Listener>,
    /// Destinations that always bypass the proxy
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Rule tool; `PXFW_IPTABLES_COMMAND` takes precedence
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before every rule, e.g. `["-w"]`
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Elevate with run0/sudo/pkexec when not running as root
    #[serde(default = "default_true")]
    pub elevate: bool,
    /// Signal names (`SIGINT`, `TERM`, ...) that interrupt a pending rule
    #[serde(default = "default_interrupt_signals")]
    pub interrupt_signals: Vec<String>,
    /// Grace period for an interrupted rule tool before it is killed
    #[serde(default = "default_reap_grace_ms")]
    pub reap_grace_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            proxy_server: None,
            redirect_ports: Vec::new(),
            listener: None,
            exclusions: default_exclusions(),
            table: default_table(),
            chain: default_chain(),
            program: default_program(),
            extra_args: Vec::new(),
            elevate: true,
            interrupt_signals: default_interrupt_signals(),
            reap_grace_ms: default_reap_grace_ms(),
        }
    }
}

fn default_exclusions() -> Vec<String> {
    DEFAULT_EXCLUSIONS.iter().map(ToString::to_string).collect()
}

fn default_table() -> String {
    NAT_TABLE.to_string()
}

fn default_chain() -> String {
    OUTPUT_CHAIN.to_string()
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_true() -> bool {
    true
}

fn default_interrupt_signals() -> Vec<String> {
    vec!["SIGINT".to_string(), "SIGTERM".to_string()]
}

fn default_reap_grace_ms() -> u64 {
    u64::try_from(DEFAULT_REAP_GRACE.as_millis()).unwrap_or(u64::MAX)
}

/// Parses `SIGTERM`, `sigterm` or `TERM`
///
/// # Errors
///
/// Returns `Error::InvalidInput` for names nix does not know.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full)
        .map_err(|_| Error::invalid("interrupt_signals", format!("unknown signal {name:?}")))
}

impl FileConfig {
    /// Handler for the controller. The listener stays optional so that an
    /// unset listener is reported by the controller as invalid input.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a signal name is unknown.
    pub fn to_handler(&self) -> Result<ProxyHandler> {
        let interrupt_signals = self
            .interrupt_signals
            .iter()
            .map(|name| parse_signal(name))
            .collect::<Result<Vec<_>>>()?;

        Ok(ProxyHandler {
            config: Some(HandlerConfig {
                proxy_server: self.proxy_server.clone(),
                redirect_ports: self.redirect_ports.clone(),
                interrupt_signals,
            }),
            listener: self.listener.clone(),
        })
    }

    pub fn to_builder(&self) -> RuleBuilder {
        RuleBuilder::new()
            .with_table(&self.table)
            .with_chain(&self.chain)
            .with_exclusions(self.exclusions.iter().cloned())
    }

    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            program: std::env::var("PXFW_IPTABLES_COMMAND").unwrap_or_else(|_| self.program.clone()),
            extra_args: self.extra_args.clone(),
            elevate: self.elevate,
            reap_grace: Duration::from_millis(self.reap_grace_ms),
        }
    }
}

/// Loads a config file.
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not valid JSON.
pub async fn load_config(path: &Path) -> Result<FileConfig> {
    let json = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

/// Saves a config file atomically.
/// 1. Writes to a temporary file in the target directory (mode 0o600).
/// 2. Syncs it to disk.
/// 3. Renames it over the target path.
///
/// # Errors
///
/// Returns `Err` if the directory is not writable or the rename fails.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<()> {
    use std::io::Write;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_string_pretty(config)?;

    // tempfile creates with 0o600 on Unix
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(json.as_bytes())?;
    file.as_file().sync_all()?;

    file.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            ))
        } else {
            Error::Io(e.error)
        }
    })?;
    Ok(())
}
