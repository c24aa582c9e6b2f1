//! Synchronous execution of one rule through the external rule tool
//!
//! [`RuleExecutor`] is the seam between the controller and the rule table.
//! Production code uses [`CommandExecutor`], which spawns `iptables` and
//! waits for it to exit. Tests substitute in-memory executors.
//!
//! # Waiting
//!
//! The executor waits on the child's exit status and, at the same time, on
//! the caller's interrupt signals. Whichever comes first decides the
//! result:
//!
//! - child exited with status 0: success
//! - child exited otherwise, or was killed: [`Error::Tool`]
//! - an interrupt signal arrived: [`Error::Interrupted`]
//!
//! There is no timeout and no retry. After an interrupt the child gets
//! [`ExecutorConfig::reap_grace`] to finish on its own and is then killed,
//! so it is always reaped before `execute` returns.
//!
//! The caller registers its [`Interrupts`] once for a whole apply, revert
//! or status call. A signal delivered between two rules, or while waiting
//! for the rule lock, stays pending in those streams and is reported by the
//! next wait instead of being lost.

use crate::core::error::{Error, Result};
use crate::core::rules::RuleSpec;
use nix::sys::signal::Signal;
use std::future::{Future, poll_fn};
use std::process::{ExitStatus, Stdio};
use std::task::Poll;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

/// Default program used to mutate the rule table
pub const DEFAULT_PROGRAM: &str = "iptables";

/// Default time an interrupted child is given before it is killed
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(2);

/// Performs one rule mutation (or check) and reports how it went.
///
/// Implementations must not return before the rule's effect on the table is
/// settled. Serialization across callers is the controller's job.
pub trait RuleExecutor: Send + Sync {
    fn execute(
        &self,
        rule: &RuleSpec,
        interrupts: &mut Interrupts,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// How [`CommandExecutor`] starts the rule tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Program name or path
    pub program: String,
    /// Arguments placed before every rule, e.g. `-w`
    pub extra_args: Vec<String>,
    /// Wrap the program in run0/sudo/pkexec when not root
    pub elevate: bool,
    /// Grace period for a child whose wait was interrupted
    pub reap_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: std::env::var("PXFW_IPTABLES_COMMAND")
                .unwrap_or_else(|_| DEFAULT_PROGRAM.to_string()),
            extra_args: Vec::new(),
            elevate: true,
            reap_grace: DEFAULT_REAP_GRACE,
        }
    }
}

/// Runs rules by spawning the rule tool as a child process
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    async fn reap_after_interrupt(&self, child: &mut Child) {
        match tokio::time::timeout(self.config.reap_grace, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "Rule tool finished after interrupt"),
            Ok(Err(e)) => warn!("Failed to wait for interrupted rule tool: {e}"),
            Err(_) => {
                warn!(
                    grace_ms = self.config.reap_grace.as_millis(),
                    "Rule tool still running after interrupt, killing it"
                );
                if let Err(e) = child.kill().await {
                    error!("Failed to kill rule tool: {e}");
                }
            }
        }
    }
}

enum Wake {
    Exited(std::io::Result<(ExitStatus, String)>),
    Signal(Signal),
}

impl RuleExecutor for CommandExecutor {
    async fn execute(&self, rule: &RuleSpec, interrupts: &mut Interrupts) -> Result<()> {
        let mut args = self.config.extra_args.clone();
        args.extend(rule.args());
        debug!(program = %self.config.program, ?args, "Spawning rule tool");

        let mut child =
            crate::elevation::create_rule_command(&self.config.program, &args, self.config.elevate)?
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| {
                    error!("Failed to spawn {}: {source}", self.config.program);
                    Error::Spawn {
                        program: self.config.program.clone(),
                        source,
                    }
                })?;

        let wake = tokio::select! {
            res = wait_with_stderr(&mut child) => Wake::Exited(res),
            signal = interrupts.recv() => Wake::Signal(signal),
        };

        match wake {
            Wake::Exited(res) => {
                let (status, stderr) = res.map_err(Error::Wait)?;
                check_status(rule, status, stderr)
            }
            Wake::Signal(signal) => {
                warn!(%signal, %rule, "Interrupted while waiting for rule tool");
                self.reap_after_interrupt(&mut child).await;
                Err(Error::Interrupted { signal })
            }
        }
    }
}

async fn wait_with_stderr(child: &mut Child) -> std::io::Result<(ExitStatus, String)> {
    let stderr = child.stderr.take();
    let read = async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            // A failed read only loses diagnostics
            let _ = stderr.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let (status, stderr) = tokio::join!(child.wait(), read);
    Ok((status?, stderr))
}

fn check_status(rule: &RuleSpec, status: ExitStatus, stderr: String) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    let stderr = stderr.trim().to_string();
    let message = if stderr.is_empty() {
        match status.code() {
            Some(code) => format!("rule tool exited with status {code}"),
            None => format!("rule tool terminated abnormally ({status})"),
        }
    } else {
        stderr.clone()
    };

    if rule.operation.is_mutation() {
        error!(%rule, exit_code = ?status.code(), "Rule tool failed: {message}");
    } else {
        debug!(%rule, exit_code = ?status.code(), "Rule check failed: {message}");
    }

    Err(Error::Tool {
        message,
        stderr: (!stderr.is_empty()).then_some(stderr),
        exit_code: status.code(),
    })
}

/// Signal streams for a caller's interrupt set.
///
/// Deliveries are only observed after registration, so register before the
/// first rule and keep the same value for the whole call.
#[derive(Debug)]
pub struct Interrupts {
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
}

impl Interrupts {
    /// Starts watching `signals`. SIGCHLD and duplicates are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for signals that cannot be caught,
    /// such as SIGKILL.
    pub fn register(signals: &[Signal]) -> Result<Self> {
        let mut streams = Vec::with_capacity(signals.len());
        for &sig in signals {
            // Child termination is observed through the wait itself
            if sig == Signal::SIGCHLD || streams.iter().any(|(s, _)| *s == sig) {
                continue;
            }
            let stream = signal(SignalKind::from_raw(sig as i32)).map_err(|e| {
                Error::invalid("interrupt_signals", format!("cannot watch {sig}: {e}"))
            })?;
            streams.push((sig, stream));
        }
        Ok(Self { streams })
    }

    /// An empty set that never fires
    pub fn none() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    /// Resolves with the first interrupt delivered since registration.
    /// Never resolves when the set is empty.
    pub async fn recv(&mut self) -> Signal {
        poll_fn(|cx| {
            for (sig, stream) in &mut self.streams {
                if let Poll::Ready(Some(())) = stream.poll_recv(cx) {
                    return Poll::Ready(*sig);
                }
            }
            Poll::Pending
        })
        .await
    }
}
