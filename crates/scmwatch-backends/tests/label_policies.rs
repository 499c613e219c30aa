//! Labelling behaviour across whole integration cycles: labels applied
//! before the get and rolled back on failure, differential re-stamping
//! against a baseline label, and shared sessions that disconnect once.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use scmwatch_backends::{MksConfig, MksConnector, PvcsConfig, PvcsConnector, VaultConfig, VaultConnector};
use scmwatch_core::fakes::ScriptedExecutor;
use scmwatch_core::{IntegrationResult, IntegrationStatus, SessionRegistries, SourceControl};

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap()
}

fn cycle(dir: &std::path::Path, label: &str) -> (IntegrationResult, IntegrationResult) {
    let from = IntegrationResult::new("game", dir, dir.join("artifacts"))
        .with_start_time(at(1))
        .with_status(IntegrationStatus::Success);
    let to = IntegrationResult::new("game", dir, dir.join("artifacts"))
        .with_start_time(at(10))
        .with_label(label);
    (from, to)
}

fn commands(executor: &ScriptedExecutor) -> Vec<String> {
    executor
        .invocations()
        .iter()
        .map(|info| info.args.first().cloned().unwrap_or_default())
        .collect()
}

const VAULT_HISTORY: &str = r#"<vault>
  <history>
    <item txid="1201" date="1/02/2020 10:00:00 AM" name="$/game/src/Main.cs" type="60" version="12" user="alice" comment="fix spawn" actionString="Checked In" />
  </history>
  <result success="yes" />
</vault>"#;

fn vault_connector(executor: Arc<ScriptedExecutor>) -> VaultConnector {
    let mut config = VaultConfig::new("vault.example.org", "Main");
    config.folder = "$/game".to_string();
    config.username = "ci".to_string();
    config.password = "s3cret".to_string();
    config.apply_label_before_get = true;
    config.use_working_directory = false;
    VaultConnector::new(config, executor).unwrap()
}

#[tokio::test]
async fn test_vault_failed_build_removes_label_applied_before_get() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_stdout(VAULT_HISTORY);
    let mut connector = vault_connector(executor.clone());
    let (from, to) = cycle(dir.path(), "build-8");

    let mods = connector.detect_changes(&from, &to).await.unwrap();
    assert_eq!(mods.len(), 1);
    connector.materialize_working_copy(&to).await.unwrap();
    assert_eq!(connector.label_tracker().applied_label(), Some("build-8"));

    let failed = to.clone().with_status(IntegrationStatus::Failure);
    connector.label(&failed).await.unwrap();

    assert_eq!(commands(&executor), vec!["history", "label", "getlabel", "deletelabel"]);
    let delete = executor.command_line(3).unwrap();
    assert!(delete.ends_with("$/game build-8"));
    assert!(!connector.label_tracker().applied());
    assert!(!executor.invocations()[3].display().contains("s3cret"));

    let getlabel = &executor.invocations()[2];
    assert!(getlabel.args.contains(&"-labelworkingfolder".to_string()));
}

#[tokio::test]
async fn test_vault_successful_build_keeps_label() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_stdout(VAULT_HISTORY);
    let mut connector = vault_connector(executor.clone());
    let (from, to) = cycle(dir.path(), "build-9");

    connector.detect_changes(&from, &to).await.unwrap();
    connector.materialize_working_copy(&to).await.unwrap();
    connector
        .label(&to.clone().with_status(IntegrationStatus::Success))
        .await
        .unwrap();

    assert_eq!(commands(&executor), vec!["history", "label", "getlabel"]);
}

#[tokio::test]
async fn test_vault_new_cycle_without_label_removes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_stdout(VAULT_HISTORY);
    let mut connector = vault_connector(executor.clone());
    let (from, to) = cycle(dir.path(), "build-10");

    connector.detect_changes(&from, &to).await.unwrap();
    connector.materialize_working_copy(&to).await.unwrap();
    assert!(connector.label_tracker().applied());

    executor.push_stdout(VAULT_HISTORY);

    // The next cycle never reaches the get, then fails.
    connector.detect_changes(&from, &to).await.unwrap();
    assert!(!connector.label_tracker().applied());
    connector
        .label(&to.clone().with_status(IntegrationStatus::Failure))
        .await
        .unwrap();

    assert_eq!(commands(&executor), vec!["history", "label", "getlabel", "history"]);
}

const PVCS_CHANGES: &str = "\
/game/src/main.c-arc|1.4|Jan 03 2020 09:15:00|alice|tighten bounds check
/game/src/util.h-arc|1.0|Jan 02 2020 11:30:00|carol|
";

const PVCS_BASELINE: &str = "\
/game/src/main.c-arc|1.4|Jan 03 2020 09:15:00|alice|tighten bounds check
/game/docs/readme.txt-arc|1.2|Dec 20 2019 08:00:00|bob|
";

#[tokio::test]
async fn test_pvcs_restamps_only_revisions_missing_from_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_stdout(PVCS_CHANGES);
    executor.push_stdout(PVCS_BASELINE);

    let mut config = PvcsConfig::new("/pvcs/db");
    config.project = "/game".to_string();
    config.baseline_label = Some("STABLE".to_string());
    config.settings.label_on_success = true;
    let mut connector = PvcsConnector::new(config, executor.clone()).unwrap();
    let (from, to) = cycle(dir.path(), "REL2");

    let mut result = to.clone().with_status(IntegrationStatus::Success);
    result.modifications = connector.detect_changes(&from, &to).await.unwrap();
    assert_eq!(result.modifications.len(), 2);

    connector.label(&result).await.unwrap();
    connector.label(&result).await.unwrap();

    let baseline_fetches = executor
        .invocations()
        .iter()
        .filter(|info| info.args.contains(&"-vSTABLE".to_string()))
        .count();
    assert_eq!(baseline_fetches, 1);

    assert_eq!(commands(&executor), vec!["vlog", "vlog", "label", "label"]);
    let label = &executor.invocations()[2];
    assert!(label.args.contains(&"-vREL2".to_string()));
    assert!(label.args.contains(&"/game/src/util.h".to_string()));
    assert!(!label.args.iter().any(|arg| arg.contains("main.c")));
}

#[tokio::test]
async fn test_pvcs_without_baseline_labels_whole_project() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    let mut config = PvcsConfig::new("/pvcs/db");
    config.project = "/game".to_string();
    config.settings.label_on_success = true;
    let mut connector = PvcsConnector::new(config, executor.clone()).unwrap();

    let (_, to) = cycle(dir.path(), "REL3");
    connector
        .label(&to.with_status(IntegrationStatus::Success))
        .await
        .unwrap();
    assert_eq!(
        executor.command_line(0).unwrap(),
        "pcli label -pr/pvcs/db -vREL3 -z /game"
    );
}

const MKS_LISTING: &str = "src/Main.java    changed\n";

const MKS_MEMBERINFO: &str = "\
Member Name: /builds/game/src/Main.java
Sandbox Name: /builds/game/project.pj
Member Revision: 1.5
Created By: alice on Jan 2, 2020 - 10:15 AM
State: Exp
Revision Description:
  fixed the parser
Labels:
";

#[tokio::test]
async fn test_mks_disconnects_once_per_operation() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.push_stdout(MKS_LISTING);
    executor.push_stdout(MKS_MEMBERINFO);

    let sessions = SessionRegistries::new();
    let registry = sessions.for_backend("mks");
    let config = MksConfig::new("mks.example.org", "/game/project.pj");
    let mut connector = MksConnector::new(config, executor.clone(), registry.clone()).unwrap();
    let (from, to) = cycle(dir.path(), "build-3");

    let mods = connector.detect_changes(&from, &to).await.unwrap();
    assert_eq!(mods.len(), 1);
    assert_eq!(mods[0].version, "1.5");
    assert_eq!(mods[0].user_name, "alice");

    assert_eq!(commands(&executor), vec!["viewsandbox", "memberinfo", "disconnect"]);
    assert!(executor.ran_with("--forceConfirm=yes"));
    assert_eq!(registry.active().await, 0);
}

#[tokio::test]
async fn test_mks_session_kept_open_without_auto_disconnect() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());

    let sessions = SessionRegistries::new();
    let mut config = MksConfig::new("mks.example.org", "/game/project.pj");
    config.auto_disconnect = false;
    config.settings.label_on_success = true;
    let mut connector =
        MksConnector::new(config, executor.clone(), sessions.for_backend("mks")).unwrap();

    let (_, to) = cycle(dir.path(), "build-4");
    connector.materialize_working_copy(&to).await.unwrap();
    connector
        .label(&to.clone().with_status(IntegrationStatus::Success))
        .await
        .unwrap();

    assert_eq!(commands(&executor), vec!["createsandbox", "checkpoint"]);
    assert!(executor.ran_with("--label=build-4"));
}
