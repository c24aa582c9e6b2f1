//! Apply/revert entry points
//!
//! [`Firewall`] owns the rule builder, the executor and the rule lock. Each
//! call builds its ordered rule list and runs it one rule at a time, holding
//! the lock for the whole of every rule including the wait on the tool. The
//! first failure stops the call; rules already applied stay in place and are
//! removed by a later [`Firewall::revert`].
//!
//! The handler's interrupt signals are watched from before the first rule
//! until the call returns. One that arrives while a rule is pending, while
//! waiting for the lock, or between two rules ends the call with
//! `Error::Interrupted`.

use crate::audit::{AuditLog, EventType};
use crate::core::builder::{Phase, RuleBuilder};
use crate::core::error::{Error, Result};
use crate::core::executor::{CommandExecutor, ExecutorConfig, Interrupts, RuleExecutor};
use crate::core::rules::{Operation, ProxyHandler, RuleSpec};
use crate::core::verify::{self, RuleStatus, StatusReport};
use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Exclusive access to the rule table.
///
/// Clones share the same lock, so every [`Firewall`] built from clones of
/// one `RuleLock` is serialized against the others.
#[derive(Debug, Clone, Default)]
pub struct RuleLock(Arc<Mutex<()>>);

impl RuleLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Configures and removes the transparent proxy rules
pub struct Firewall<E = CommandExecutor> {
    builder: RuleBuilder,
    executor: E,
    lock: RuleLock,
    audit: Option<AuditLog>,
}

impl Firewall<CommandExecutor> {
    pub fn new(builder: RuleBuilder, config: ExecutorConfig) -> Self {
        Self::with_executor(builder, CommandExecutor::new(config))
    }
}

impl<E: RuleExecutor> Firewall<E> {
    pub fn with_executor(builder: RuleBuilder, executor: E) -> Self {
        Self {
            builder,
            executor,
            lock: RuleLock::new(),
            audit: None,
        }
    }

    /// Shares `lock` with other firewalls touching the same rule table
    pub fn with_lock(mut self, lock: RuleLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn lock(&self) -> &RuleLock {
        &self.lock
    }

    /// Rules an apply or revert would run, without running them
    pub fn plan(&self, handler: &ProxyHandler, phase: Phase) -> Result<Vec<RuleSpec>> {
        self.builder.build(handler, phase)
    }

    /// Installs the bypass, exclusion and redirection rules.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` if the handler is incomplete (nothing is run)
    /// - `Error::Interrupted` if an interrupt signal arrived mid-rule
    /// - any other error if a rule could not be applied
    pub async fn apply(&self, handler: &ProxyHandler) -> Result<()> {
        self.run(handler, Phase::Apply).await
    }

    /// Removes the rules [`Firewall::apply`] installs, in the same order.
    ///
    /// # Errors
    ///
    /// Same as [`Firewall::apply`].
    pub async fn revert(&self, handler: &ProxyHandler) -> Result<()> {
        self.run(handler, Phase::Revert).await
    }

    /// Reports which apply-time rules are currently in the table.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the handler is incomplete or a check fails for a
    /// reason other than the rule being absent.
    pub async fn status(&self, handler: &ProxyHandler) -> Result<StatusReport> {
        let rules = self.builder.build(handler, Phase::Apply)?;
        let mut interrupts = Interrupts::register(interrupt_signals(handler))?;
        let mut statuses = Vec::with_capacity(rules.len());
        let mut outcome = Ok(());

        for rule in rules {
            let check = rule.with_operation(Operation::Check);
            let result = self.run_rule(&check, &mut interrupts).await;
            match verify::classify_check(result) {
                Ok(present) => statuses.push(RuleStatus { rule, present }),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let report = StatusReport { rules: statuses };
        self.audit(EventType::CheckRules, report.rules.len(), report.rules.len(), &outcome)
            .await;
        outcome.map(|()| report)
    }

    async fn run(&self, handler: &ProxyHandler, phase: Phase) -> Result<()> {
        let rules = self.builder.build(handler, phase)?;
        let mut interrupts = Interrupts::register(interrupt_signals(handler))?;

        info!(%phase, rule_count = rules.len(), "Running firewall rules");
        let (executed, result) = self.execute_all(&rules, &mut interrupts).await;

        match &result {
            Ok(()) => info!(%phase, rule_count = rules.len(), "Firewall rules complete"),
            Err(e) => warn!(
                %phase,
                executed,
                rule_count = rules.len(),
                outcome = %e.outcome(),
                "Stopped after failed rule: {e}"
            ),
        }

        let event = match phase {
            Phase::Apply => EventType::ApplyRules,
            Phase::Revert => EventType::RevertRules,
        };
        self.audit(event, rules.len(), executed, &result).await;
        result
    }

    /// Runs `rules` in order and returns how many succeeded
    async fn execute_all(
        &self,
        rules: &[RuleSpec],
        interrupts: &mut Interrupts,
    ) -> (usize, Result<()>) {
        for (index, rule) in rules.iter().enumerate() {
            if let Err(e) = self.run_rule(rule, interrupts).await {
                return (index, Err(e));
            }
            info!(%rule, "Rule done");
        }
        (rules.len(), Ok(()))
    }

    /// Runs one rule under the lock. A pending interrupt wins over the lock,
    /// so nothing is spawned once one has been delivered.
    async fn run_rule(&self, rule: &RuleSpec, interrupts: &mut Interrupts) -> Result<()> {
        let _guard = tokio::select! {
            biased;
            signal = interrupts.recv() => {
                warn!(%signal, %rule, "Interrupted before rule started");
                return Err(Error::Interrupted { signal });
            }
            guard = self.lock.acquire() => guard,
        };
        self.executor.execute(rule, interrupts).await
    }

    async fn audit(&self, event: EventType, rule_count: usize, executed: usize, result: &Result<()>) {
        if let Some(audit) = &self.audit {
            audit.record(event, rule_count, executed, result).await;
        }
    }
}

fn interrupt_signals(handler: &ProxyHandler) -> &[Signal] {
    handler
        .config
        .as_ref()
        .map(|c| c.interrupt_signals.as_slice())
        .unwrap_or_default()
}

impl<E> std::fmt::Debug for Firewall<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall")
            .field("builder", &self.builder)
            .field("lock", &self.lock)
            .field("audit", &self.audit.as_ref().map(AuditLog::path))
            .finish_non_exhaustive()
    }
}
