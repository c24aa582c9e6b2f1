//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::error::{Error, Result};
use crate::core::executor::{
    CommandExecutor, DEFAULT_REAP_GRACE, ExecutorConfig, Interrupts, RuleExecutor,
};
use crate::core::rules::{
    HandlerConfig, Listener, Matcher, NAT_TABLE, OUTPUT_CHAIN, Operation, Protocol, ProxyHandler,
    RuleSpec, Target, Transport,
};
use nix::sys::signal::Signal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mutex for tests that need exclusive access to environment variables.
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Path of the shell stand-in for iptables (`tests/mock_iptables.sh`)
pub fn mock_script_path() -> String {
    format!("{}/tests/mock_iptables.sh", env!("CARGO_MANIFEST_DIR"))
}

/// Real [`CommandExecutor`] running the mock script in `mode`
/// (`ok`, `fail`, `sleep`, or `table <file>`).
pub fn mock_executor_with(mode_args: &[&str]) -> CommandExecutor {
    let mut extra_args = vec![mock_script_path()];
    extra_args.extend(mode_args.iter().map(ToString::to_string));
    CommandExecutor::new(ExecutorConfig {
        program: "sh".to_string(),
        extra_args,
        elevate: false,
        reap_grace: DEFAULT_REAP_GRACE,
    })
}

pub fn mock_executor(mode: &str) -> CommandExecutor {
    mock_executor_with(&[mode])
}

/// Stream listener on 127.0.0.1:12345 with the given proxy server and ports
pub fn create_test_handler(proxy_server: Option<&str>, redirect_ports: &[&str]) -> ProxyHandler {
    ProxyHandler::new(
        HandlerConfig {
            proxy_server: proxy_server.map(String::from),
            redirect_ports: redirect_ports.iter().map(ToString::to_string).collect(),
            interrupt_signals: Vec::new(),
        },
        Listener {
            transport: Transport::Stream,
            host: Some("127.0.0.1".to_string()),
            port: Some(12345),
        },
    )
}

pub fn ports(list: &[u16]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

pub fn create_accept_rule(addr: &str) -> RuleSpec {
    RuleSpec {
        table: NAT_TABLE.to_string(),
        chain: OUTPUT_CHAIN.to_string(),
        operation: Operation::InsertTop,
        protocol: Protocol::Tcp,
        matcher: Matcher::DestinationAddress(addr.to_string()),
        target: Target::Accept,
    }
}

/// In-memory rule table implementing [`RuleExecutor`].
///
/// Records every call, tracks how many calls overlap, and can be told to
/// fail a given call.
#[derive(Debug, Default)]
pub struct FakeTable {
    /// Rule keys in chain order
    pub rules: Mutex<Vec<String>>,
    /// Every rule executed, in call order
    pub calls: Mutex<Vec<RuleSpec>>,
    /// Zero-based call index that exits with status 4
    pub fail_on: Option<usize>,
    /// Time each call spends "running"
    pub delay: Duration,
    /// Zero-based call index that sends a signal to this process once the
    /// call has succeeded
    pub raise_after: Option<(usize, Signal)>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(index: usize) -> Self {
        Self {
            fail_on: Some(index),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn raising_after(index: usize, signal: Signal) -> Self {
        Self {
            raise_after: Some((index, signal)),
            ..Self::default()
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.lock().unwrap().len()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn absent() -> Error {
        Error::Tool {
            message: "Bad rule (does a matching rule exist in that chain?).".to_string(),
            stderr: None,
            exit_code: Some(1),
        }
    }

    fn mutate(&self, rule: &RuleSpec) -> Result<()> {
        let key = rule.with_operation(Operation::Check).to_string();
        let mut rules = self.rules.lock().unwrap();
        match rule.operation {
            Operation::InsertTop => rules.insert(0, key),
            Operation::InsertBottom => rules.push(key),
            Operation::Delete => {
                let index = rules.iter().position(|r| *r == key).ok_or_else(Self::absent)?;
                rules.remove(index);
            }
            Operation::Check => {
                if !rules.contains(&key) {
                    return Err(Self::absent());
                }
            }
        }
        Ok(())
    }
}

impl RuleExecutor for FakeTable {
    async fn execute(&self, rule: &RuleSpec, _interrupts: &mut Interrupts) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(rule.clone());
            calls.len() - 1
        };

        let result = if self.fail_on == Some(index) {
            Err(Error::Tool {
                message: "simulated failure".to_string(),
                stderr: None,
                exit_code: Some(4),
            })
        } else {
            self.mutate(rule)
        };

        if let Some((raise_index, signal)) = self.raise_after
            && raise_index == index
            && result.is_ok()
        {
            nix::sys::signal::kill(nix::unistd::Pid::this(), signal).unwrap();
            // Let the signal driver record the delivery
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
