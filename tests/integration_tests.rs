//! End-to-end tests driving the public API against `tests/mock_iptables.sh`
//!
//! Every rule runs as a real child process, so these cover argv
//! construction, exit status handling and stderr capture.

use pxfw::audit::{AuditLog, EventType};
use pxfw::config::{FileConfig, load_config, save_config};
use pxfw::core::builder::DEFAULT_EXCLUSIONS;
use pxfw::core::rules::{Listener, Transport};
use pxfw::{Error, ExecutorConfig, Firewall, Outcome, Phase, RuleBuilder};
use std::path::Path;
use std::time::Duration;

fn mock_script() -> String {
    format!("{}/tests/mock_iptables.sh", env!("CARGO_MANIFEST_DIR"))
}

fn executor_config(mode_args: &[&str]) -> ExecutorConfig {
    let mut extra_args = vec![mock_script()];
    extra_args.extend(mode_args.iter().map(ToString::to_string));
    ExecutorConfig {
        program: "sh".to_string(),
        extra_args,
        elevate: false,
        reap_grace: Duration::from_millis(200),
    }
}

fn file_config(ports: &[&str]) -> FileConfig {
    FileConfig {
        proxy_server: Some("198.51.100.20".to_string()),
        redirect_ports: ports.iter().map(ToString::to_string).collect(),
        listener: Some(Listener {
            transport: Transport::Stream,
            host: Some("127.0.0.1".to_string()),
            port: Some(1080),
        }),
        elevate: false,
        ..FileConfig::default()
    }
}

fn table_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn test_apply_status_revert_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("nat.rules");
    let table_arg = table.to_string_lossy().into_owned();

    let config = file_config(&["80", "443"]);
    let handler = config.to_handler().unwrap();
    let firewall = Firewall::new(
        config.to_builder(),
        executor_config(&["table", &table_arg]),
    );

    firewall.apply(&handler).await.unwrap();

    let lines = table_lines(&table);
    assert_eq!(lines.len(), DEFAULT_EXCLUSIONS.len() + 2);
    // Inserted rules end up in reverse order above the appended DNAT
    assert_eq!(lines[0], format!("-p tcp -d {} -j ACCEPT", DEFAULT_EXCLUSIONS[2]));
    assert_eq!(lines[2], format!("-p tcp -d {} -j ACCEPT", DEFAULT_EXCLUSIONS[0]));
    assert_eq!(lines[3], "-p tcp -d 198.51.100.20 -j ACCEPT");
    assert_eq!(
        lines[4],
        "-p tcp -m multiport --dports 80,443 -j DNAT --to-destination 127.0.0.1:1080"
    );

    let report = firewall.status(&handler).await.unwrap();
    assert!(report.fully_applied());

    firewall.revert(&handler).await.unwrap();
    assert!(table_lines(&table).is_empty());
    assert!(firewall.status(&handler).await.unwrap().fully_reverted());
}

#[tokio::test]
async fn test_partial_apply_then_revert_reports_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("nat.rules");
    let table_arg = table.to_string_lossy().into_owned();
    let config = file_config(&["80"]);
    let handler = config.to_handler().unwrap();
    let firewall = Firewall::new(
        config.to_builder(),
        executor_config(&["table", &table_arg]),
    );

    // Only the bypass rule is in place
    std::fs::write(&table, "-p tcp -d 198.51.100.20 -j ACCEPT\n").unwrap();

    let report = firewall.status(&handler).await.unwrap();
    assert!(!report.fully_applied());
    assert!(!report.fully_reverted());
    assert_eq!(report.missing().count(), DEFAULT_EXCLUSIONS.len() + 1);

    // Revert removes the bypass, then stops at the first missing exclusion
    let result = firewall.revert(&handler).await;
    assert_eq!(Outcome::from(&result), Outcome::Fatal);
    assert!(table_lines(&table).is_empty());
}

#[tokio::test]
async fn test_tool_failure_is_fatal_with_stderr() {
    let config = file_config(&["80"]);
    let handler = config.to_handler().unwrap();
    let firewall = Firewall::new(config.to_builder(), executor_config(&["fail"]));

    let err = firewall.apply(&handler).await.unwrap_err();
    assert_eq!(err.outcome(), Outcome::Fatal);
    match err {
        Error::Tool {
            stderr, exit_code, ..
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.unwrap().contains("Bad rule"));
        }
        other => panic!("expected tool error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_listener_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let table = dir.path().join("nat.rules");
    let table_arg = table.to_string_lossy().into_owned();
    let config = FileConfig {
        listener: None,
        ..file_config(&["80"])
    };
    let handler = config.to_handler().unwrap();
    let firewall = Firewall::new(
        config.to_builder(),
        executor_config(&["table", &table_arg]),
    );

    let result = firewall.apply(&handler).await;
    assert_eq!(Outcome::from(&result), Outcome::InvalidInput);
    assert!(!table.exists());
}

#[tokio::test]
async fn test_config_file_drives_plan_and_audit() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    save_config(
        &config_path,
        &FileConfig {
            exclusions: vec!["192.0.2.0/24".to_string()],
            ..file_config(&["8080"])
        },
    )
    .unwrap();

    let config = load_config(&config_path).await.unwrap();
    let handler = config.to_handler().unwrap();
    let audit = AuditLog::at(dir.path().join("audit.log"));
    let firewall = Firewall::new(config.to_builder(), executor_config(&["ok"]))
        .with_audit(audit.clone());

    let plan = firewall.plan(&handler, Phase::Apply).unwrap();
    assert_eq!(plan.len(), 3);
    assert_eq!(plan[1].to_string(), "-t nat -I OUTPUT -p tcp -d 192.0.2.0/24 -j ACCEPT");

    firewall.apply(&handler).await.unwrap();
    firewall.revert(&handler).await.unwrap();

    let events = audit.read_recent(10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::RevertRules);
    assert_eq!(events[1].event_type, EventType::ApplyRules);
    assert!(events.iter().all(pxfw::audit::AuditEvent::success));
}

#[test]
fn test_injected_port_is_rejected() {
    let config = file_config(&["80", "--to-destination"]);
    let handler = config.to_handler().unwrap();

    let err = RuleBuilder::new().build(&handler, Phase::Apply).unwrap_err();
    assert_eq!(err.outcome(), Outcome::InvalidInput);
}
