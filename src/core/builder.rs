//! Rule generation from a proxy handler
//!
//! Produces the ordered rules for one apply or revert:
//!
//! 1. **Bypass** - accept traffic to the upstream proxy server (only when one is set)
//! 2. **Exclusions** - accept traffic to allow-listed destinations (tcp)
//! 3. **Redirection** - DNAT the redirect ports to the local listener
//!    (only when ports are given and the listener has a host and port)
//!
//! Bypass and exclusion rules are inserted at the top of the chain and the
//! redirection is appended at the bottom, so the accepts always win over
//! the catch-all DNAT. Revert uses the same rules with the operation
//! switched to delete.

use crate::core::error::{Error, Result};
use crate::core::rules::{
    HandlerConfig, Listener, Matcher, NAT_TABLE, OUTPUT_CHAIN, Operation, Protocol, ProxyHandler,
    RuleSpec, Target,
};
use crate::validators;
use tracing::debug;

/// Destinations that always connect directly, never through the proxy
pub const DEFAULT_EXCLUSIONS: [&str; 3] = ["18.153.178.179", "158.160.55.64", "212.41.27.34"];

/// Which half of the rule lifecycle a rule list is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    #[strum(serialize = "apply")]
    Apply,
    #[strum(serialize = "revert")]
    Revert,
}

/// Builds rule lists for a fixed table, chain and exclusion allow-list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBuilder {
    table: String,
    chain: String,
    exclusions: Vec<String>,
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self {
            table: NAT_TABLE.to_string(),
            chain: OUTPUT_CHAIN.to_string(),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl RuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    /// Replaces the exclusion allow-list
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the ordered rule list for `phase`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the handler is missing its
    /// configuration or listener, or if any value fails validation.
    pub fn build(&self, handler: &ProxyHandler, phase: Phase) -> Result<Vec<RuleSpec>> {
        let (config, listener) = Self::require(handler)?;
        self.validate(config, listener)?;

        let protocol = Protocol::from(listener.transport);
        debug!(
            %phase,
            transport = %listener.transport,
            protocol = protocol.as_str(),
            "Building rules"
        );
        let mut rules = Vec::with_capacity(self.exclusions.len() + 2);

        if let Some(server) = &config.proxy_server {
            rules.push(self.accept(protocol, server));
        }

        for addr in &self.exclusions {
            rules.push(self.accept(Protocol::Tcp, addr));
        }

        if let Some(redirect) = self.redirect(config, listener, protocol) {
            rules.push(redirect);
        }

        if phase == Phase::Revert {
            for rule in &mut rules {
                rule.operation = Operation::Delete;
            }
        }

        Ok(rules)
    }

    /// Splits a handler into its two required halves
    pub(crate) fn require(handler: &ProxyHandler) -> Result<(&HandlerConfig, &Listener)> {
        let config = handler
            .config
            .as_ref()
            .ok_or_else(|| Error::invalid("config", "handler configuration is missing"))?;
        let listener = handler
            .listener
            .as_ref()
            .ok_or_else(|| Error::invalid("listener", "listener descriptor is missing"))?;
        Ok((config, listener))
    }

    fn validate(&self, config: &HandlerConfig, listener: &Listener) -> Result<()> {
        if let Some(server) = &config.proxy_server {
            validators::validate_address(server)
                .map_err(|m| Error::invalid("proxy_server", m))?;
        }

        for port in &config.redirect_ports {
            validators::validate_port_entry(port)
                .map_err(|m| Error::invalid("redirect_ports", format!("{port:?}: {m}")))?;
        }

        for addr in &self.exclusions {
            validators::validate_network(addr)
                .map_err(|m| Error::invalid("exclusions", format!("{addr:?}: {m}")))?;
        }

        if let Some(host) = &listener.host {
            validators::validate_address(host).map_err(|m| Error::invalid("listener.host", m))?;
        }

        validators::validate_token(&self.table).map_err(|m| Error::invalid("table", m))?;
        validators::validate_token(&self.chain).map_err(|m| Error::invalid("chain", m))?;

        Ok(())
    }

    fn accept(&self, protocol: Protocol, addr: &str) -> RuleSpec {
        RuleSpec {
            table: self.table.clone(),
            chain: self.chain.clone(),
            operation: Operation::InsertTop,
            protocol,
            matcher: Matcher::DestinationAddress(addr.to_string()),
            target: Target::Accept,
        }
    }

    fn redirect(
        &self,
        config: &HandlerConfig,
        listener: &Listener,
        protocol: Protocol,
    ) -> Option<RuleSpec> {
        if config.redirect_ports.is_empty() {
            return None;
        }
        let to = listener.redirect_address()?;

        Some(RuleSpec {
            table: self.table.clone(),
            chain: self.chain.clone(),
            operation: Operation::InsertBottom,
            protocol,
            matcher: Matcher::DestinationPorts(config.redirect_ports.join(",")),
            target: Target::Dnat { to },
        })
    }
}
