//! pxfw - transparent proxy firewall rules
//!
//! Installs and removes the NAT rules a transparent proxy needs:
//!
//! - a bypass for the upstream proxy server's own traffic
//! - direct-connect exclusions for allow-listed destinations
//! - a DNAT redirection of selected destination ports to the local listener
//!
//! # Architecture
//!
//! - [`core`] - Rule generation, execution and the apply/revert controller
//! - [`audit`] - Audit logging of every rule table change
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration persistence
//! - [`elevation`] - Running the rule tool with root privileges
//! - [`utils`] - XDG directories
//!
//! # Example
//!
//! ```no_run
//! use pxfw::core::rules::{HandlerConfig, Listener, ProxyHandler, Transport};
//! use pxfw::{ExecutorConfig, Firewall, RuleBuilder};
//!
//! # async fn example() -> pxfw::Result<()> {
//! let firewall = Firewall::new(RuleBuilder::new(), ExecutorConfig::default());
//! let handler = ProxyHandler::new(
//!     HandlerConfig {
//!         proxy_server: Some("203.0.113.7".to_string()),
//!         redirect_ports: vec!["80".to_string(), "443".to_string()],
//!         interrupt_signals: vec![nix::sys::signal::Signal::SIGTERM],
//!     },
//!     Listener {
//!         transport: Transport::Stream,
//!         host: Some("127.0.0.1".to_string()),
//!         port: Some(12345),
//!     },
//! );
//!
//! firewall.apply(&handler).await?;
//! // ... proxy runs ...
//! firewall.revert(&handler).await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::builder::{Phase, RuleBuilder};
pub use core::controller::{Firewall, RuleLock};
pub use core::error::{Error, Outcome, Result};
pub use core::executor::{CommandExecutor, ExecutorConfig, Interrupts, RuleExecutor};
