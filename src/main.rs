//! pxfw - transparent proxy firewall rules
//!
//! # Usage
//!
//! ```bash
//! pxfw init                  # Write a default config file
//! pxfw plan                  # Print the rules apply would run
//! pxfw plan --revert         # Print the rules revert would run
//! pxfw apply                 # Install bypass, exclusion and redirect rules
//! pxfw status                # Show which rules are in the table
//! pxfw revert                # Remove them again
//! ```
//!
//! The exit status is the outcome code: 0 none, 1 invalid input, 2 fatal,
//! 3 signal received.

use clap::{Parser, Subcommand};
use pxfw::audit::AuditLog;
use pxfw::config::{self, FileConfig};
use pxfw::core::error::IptablesErrorPattern;
use pxfw::core::rules::ProxyHandler;
use pxfw::core::verify;
use pxfw::{Error, Firewall, Outcome, Phase};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pxfw")]
#[command(about = "Transparent proxy firewall rules for iptables", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/pxfw/config.json)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Install the proxy rules
    Apply,
    /// Remove the proxy rules
    Revert,
    /// Show which proxy rules are currently installed
    Status,
    /// Print the rules without running them
    Plan {
        /// Show the revert rules instead of the apply rules
        #[arg(short, long)]
        revert: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PXFW_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(config_path) = cli.config.or_else(pxfw::utils::default_config_path) else {
        eprintln!("Error: cannot determine config directory; pass --config");
        return exit_code(Outcome::InvalidInput);
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return exit_code(Outcome::Fatal);
        }
    };

    let result = runtime.block_on(handle_cli(cli.command, &config_path));
    let outcome = Outcome::from(&result);
    if let Err(e) = result {
        report_error(&e);
    }
    exit_code(outcome)
}

fn exit_code(outcome: Outcome) -> ExitCode {
    ExitCode::from(u8::try_from(outcome.code()).unwrap_or(u8::MAX))
}

async fn handle_cli(command: Commands, config_path: &Path) -> pxfw::Result<()> {
    match command {
        Commands::Init { force } => init_config(config_path, force)?,
        Commands::Plan { revert } => {
            let (_, handler, firewall) = load(config_path).await?;
            let phase = if revert { Phase::Revert } else { Phase::Apply };
            for rule in firewall.plan(&handler, phase)? {
                println!("{} {rule}", firewall.executor().config().program);
            }
        }
        Commands::Apply => {
            let (file_config, handler, firewall) = load(config_path).await?;
            if !nix::unistd::getuid().is_root() && file_config.elevate {
                println!("Note: Not running as root. Will use run0/sudo/pkexec for each rule.");
            }
            firewall.apply(&handler).await?;
            println!("✓ Proxy rules applied.");
        }
        Commands::Revert => {
            let (_, handler, firewall) = load(config_path).await?;
            firewall.revert(&handler).await?;
            println!("✓ Proxy rules removed.");
        }
        Commands::Status => {
            let (_, handler, firewall) = load(config_path).await?;
            let report = firewall.status(&handler).await?;
            for status in &report.rules {
                let mark = if status.present { "✓" } else { "✗" };
                println!("  {mark} {}", status.rule);
            }
            if report.fully_applied() {
                println!("Applied ({} rules).", report.rules.len());
            } else if report.fully_reverted() {
                println!("Not applied.");
            } else {
                println!("Partially applied ({} missing).", report.missing().count());
            }
        }
    }
    Ok(())
}

async fn load(config_path: &Path) -> pxfw::Result<(FileConfig, ProxyHandler, Firewall)> {
    let file_config = config::load_config(config_path).await?;
    let handler = file_config.to_handler()?;
    let firewall = build_firewall(&file_config);
    Ok((file_config, handler, firewall))
}

fn build_firewall(file_config: &FileConfig) -> Firewall {
    let firewall = Firewall::new(file_config.to_builder(), file_config.to_executor_config());

    if let Err(e) = pxfw::utils::ensure_dirs() {
        tracing::warn!("Failed to create state directory: {e}");
    }
    match AuditLog::new() {
        Ok(audit) => firewall.with_audit(audit),
        Err(e) => {
            tracing::warn!("Audit logging disabled: {e}");
            firewall
        }
    }
}

fn init_config(path: &Path, force: bool) -> pxfw::Result<()> {
    if path.exists() && !force {
        return Err(Error::invalid(
            "config",
            format!("{} already exists (use --force to overwrite)", path.display()),
        ));
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    config::save_config(path, &FileConfig::default())?;
    println!("Wrote {}", path.display());
    println!("Set \"listener\" and \"redirect_ports\" before running apply.");
    Ok(())
}

fn report_error(error: &Error) {
    eprintln!("Error: {error}");

    if let Error::Tool { message, stderr, .. } = error {
        let details = stderr.as_deref().unwrap_or(message);
        for line in verify::parse_tool_errors(details) {
            eprintln!("  {line}");
        }

        let translation = IptablesErrorPattern::match_error(details);
        eprintln!("{}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}
