//! Rule data structures and iptables argument generation
//!
//! This module defines the data handed to pxfw by the proxy (listener and
//! handler configuration) and the [`RuleSpec`] built from it. A rule spec is
//! ephemeral: it is rendered into one `iptables` argument vector and dropped.
//!
//! # Example
//!
//! ```
//! use pxfw::core::rules::{Matcher, Operation, Protocol, RuleSpec, Target};
//!
//! let rule = RuleSpec {
//!     table: "nat".to_string(),
//!     chain: "OUTPUT".to_string(),
//!     operation: Operation::InsertTop,
//!     protocol: Protocol::Tcp,
//!     matcher: Matcher::DestinationAddress("10.0.0.1".to_string()),
//!     target: Target::Accept,
//! };
//! assert_eq!(
//!     rule.args(),
//!     ["-t", "nat", "-I", "OUTPUT", "-p", "tcp", "-d", "10.0.0.1", "-j", "ACCEPT"]
//! );
//! ```

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Table every pxfw rule lives in
pub const NAT_TABLE: &str = "nat";

/// Chain for locally generated traffic
pub const OUTPUT_CHAIN: &str = "OUTPUT";

/// Transport type of the local proxy listener
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    /// Connection oriented (`SOCK_STREAM`)
    #[default]
    Stream,
    /// Datagram (`SOCK_DGRAM`)
    Datagram,
    /// Anything else
    Other,
}

/// Protocol token passed to `-p`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "all",
        }
    }
}

impl From<Transport> for Protocol {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Stream => Protocol::Tcp,
            Transport::Datagram => Protocol::Udp,
            Transport::Other => Protocol::All,
        }
    }
}

/// Where the rule is placed, or whether it is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `-I`: evaluated before everything already in the chain
    InsertTop,
    /// `-A`: evaluated after everything already in the chain
    InsertBottom,
    /// `-D`
    Delete,
    /// `-C`: exit status tells whether the rule exists
    Check,
}

impl Operation {
    pub const fn flag(self) -> &'static str {
        match self {
            Operation::InsertTop => "-I",
            Operation::InsertBottom => "-A",
            Operation::Delete => "-D",
            Operation::Check => "-C",
        }
    }

    /// True for operations that change the rule table
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Operation::Check)
    }
}

/// Packet match of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// `-d <addr>`
    DestinationAddress(String),
    /// `-m multiport --dports <list>`
    DestinationPorts(String),
}

impl Matcher {
    pub fn value(&self) -> &str {
        match self {
            Matcher::DestinationAddress(v) | Matcher::DestinationPorts(v) => v,
        }
    }
}

/// Rule target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `-j ACCEPT`
    Accept,
    /// `-j DNAT --to-destination <host:port>`
    Dnat { to: String },
}

/// One `iptables` invocation worth of rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub table: String,
    pub chain: String,
    pub operation: Operation,
    pub protocol: Protocol,
    pub matcher: Matcher,
    pub target: Target,
}

impl RuleSpec {
    /// Same rule with a different operation. Used to derive revert and
    /// check rules from the apply-time rules.
    pub fn with_operation(&self, operation: Operation) -> Self {
        Self {
            operation,
            ..self.clone()
        }
    }

    /// Arguments for the rule tool, program name excluded
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-t".into(),
            self.table.clone(),
            self.operation.flag().into(),
            self.chain.clone(),
            "-p".into(),
            self.protocol.as_str().into(),
        ];

        match &self.matcher {
            Matcher::DestinationAddress(addr) => {
                args.push("-d".into());
                args.push(addr.clone());
            }
            Matcher::DestinationPorts(ports) => {
                args.extend(["-m".into(), "multiport".into(), "--dports".into()]);
                args.push(ports.clone());
            }
        }

        match &self.target {
            Target::Accept => args.extend(["-j".into(), "ACCEPT".into()]),
            Target::Dnat { to } => {
                args.extend(["-j".into(), "DNAT".into(), "--to-destination".into()]);
                args.push(to.clone());
            }
        }

        args
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args().join(" "))
    }
}

/// The proxy's local listener that redirected traffic is sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Listener {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Listener {
    /// `host:port` if both are known. IPv6 hosts are bracketed
    /// (`[::1]:53`) as `--to-destination` expects.
    pub fn redirect_address(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) if host.contains(':') => Some(format!("[{host}]:{port}")),
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

/// Proxy settings consumed by the rule builder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandlerConfig {
    /// Upstream proxy server; its own traffic must bypass redirection
    pub proxy_server: Option<String>,
    /// Destination ports redirected to the listener, in order
    pub redirect_ports: Vec<String>,
    /// Signals that interrupt a pending rule
    pub interrupt_signals: Vec<Signal>,
}

/// Everything an apply/revert call needs. Both halves are optional because
/// callers hand over partially initialised proxies; missing halves are
/// rejected as invalid input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyHandler {
    pub config: Option<HandlerConfig>,
    pub listener: Option<Listener>,
}

impl ProxyHandler {
    pub fn new(config: HandlerConfig, listener: Listener) -> Self {
        Self {
            config: Some(config),
            listener: Some(listener),
        }
    }
}
