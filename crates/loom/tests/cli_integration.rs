//! CLI integration tests for the Loom command-line interface.
//!
//! Each test runs the binary inside a temporary directory that doubles as the
//! config directory, so no user configuration leaks in and log files land in
//! the temp dir.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SERVICES: &str = r#"
services:
  local_activities:
    chunk_documents:
      description: Split documents into chunks
      parameters:
        - { name: documents, type: documents }
      returns: { type: chunks }
    format_context:
      parameters:
        - { name: documents, type: documents }
      returns: { type: context }

  embedding_service:
    task_queue: embedding-queue
    activities:
      embed_and_index:
        timeout_seconds: 5
        retry_attempts: 1
        parameters:
          - { name: chunks, type: chunks+collection }
        returns: { type: index_result }

  search_service:
    task_queue: search-queue
    activities:
      retrieve:
        parameters:
          - { name: query, type: query+collection }
        returns: { type: search_results }

  llm_service:
    task_queue: llm-queue
    activities:
      generate_answer:
        parameters:
          - { name: context, type: context }
        returns: { type: answer }

pipelines:
  document_ingestion:
    description: Chunk documents and index the chunks
    input_shape: documents
    steps:
      - activity: chunk_documents
        type: local
      - activity: embed_and_index
        type: remote
        service: embedding_service
        input_transform: chunked_docs_with_collection

  answer_question:
    steps:
      - activity: retrieve
        type: remote
      - activity: generate_answer
        type: remote
"#;

/// Temp dir holding `services.yaml`.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("services.yaml"), SERVICES).unwrap();
    dir
}

/// Get a command for the loom binary, isolated in `dir`.
fn loom(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("loom").unwrap();
    cmd.current_dir(dir)
        .env("LOOM_CONFIG_DIR", dir)
        .env_remove("LOOM_SERVICES");
    cmd
}

/// A loom command pointed at the fixture services file.
fn loom_with_services(dir: &Path) -> Command {
    let mut cmd = loom(dir);
    cmd.arg("--services").arg(dir.join("services.yaml"));
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    loom(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("activities"))
        .stdout(predicate::str::contains("pipelines"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("bridge"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    loom(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("loom"));
}

#[test]
fn test_missing_services_file_is_reported() {
    let dir = TempDir::new().unwrap();
    loom(dir.path())
        .arg("activities")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No services file"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Listing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_activities_lists_catalog() {
    let dir = workspace();
    loom_with_services(dir.path())
        .arg("activities")
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk_documents"))
        .stdout(predicate::str::contains("embedding-queue"))
        .stdout(predicate::str::contains("generate_answer"));
}

#[test]
fn test_activities_filtered_by_service() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["activities", "--service", "llm_service"])
        .assert()
        .success()
        .stdout(predicate::str::contains("generate_answer"))
        .stdout(predicate::str::contains("chunk_documents").not());
}

#[test]
fn test_services_file_from_project_config() {
    let dir = workspace();
    std::fs::write(
        dir.path().join("loom.toml"),
        "[pipeline]\nservices_file = \"services.yaml\"\n",
    )
    .unwrap();

    loom(dir.path())
        .args(["--json", "pipelines"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"document_ingestion\""))
        .stdout(predicate::str::contains("\"answer_question\""));
}

#[test]
fn test_pipelines_lists_step_kinds() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["pipelines", "--steps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_activities.chunk_documents"))
        .stdout(predicate::str::contains(" local "))
        .stdout(predicate::str::contains(" remote "))
        .stdout(predicate::str::contains("transform: chunked_docs_with_collection"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation and Bridging
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_validate_valid_pipeline() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["validate", "document_ingestion"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid"));
}

#[test]
fn test_validate_reports_gap_with_bridge() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["validate", "answer_question"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("incompatible"))
        .stdout(predicate::str::contains("local_activities.format_context"))
        .stderr(predicate::str::contains("failed validation"));
}

#[test]
fn test_validate_unknown_pipeline() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["validate", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_bridge_by_bare_names() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["--json", "bridge", "retrieve", "generate_answer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local_activities.format_context"))
        .stdout(predicate::str::contains("extract_documents"));
}

#[test]
fn test_bridge_respects_hop_cap() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args([
            "bridge",
            "search_service.retrieve",
            "llm_service.generate_answer",
            "--max-hops",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No known bridge"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_with_echo_workers() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args([
            "--json",
            "run",
            "document_ingestion",
            "--echo-remote",
            "--input",
            r#"{"documents": [{"id": "d1", "text": "hello world"}], "collection": "notes"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"succeeded\""))
        .stdout(predicate::str::contains("\"collection\": \"notes\""));
}

#[test]
fn test_run_input_from_file() {
    let dir = workspace();
    std::fs::write(
        dir.path().join("input.json"),
        r#"{"documents": [{"id": "d1", "text": "one two three"}]}"#,
    )
    .unwrap();

    loom_with_services(dir.path())
        .args(["run", "document_ingestion", "--echo-remote", "--input", "@input.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));
}

#[test]
fn test_run_without_remote_handler_fails() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args([
            "--json",
            "run",
            "document_ingestion",
            "--input",
            r#"{"documents": [{"id": "d1", "text": "hello"}]}"#,
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"status\": \"failed\""))
        .stdout(predicate::str::contains("no handler registered"));
}

#[test]
fn test_run_rejects_invalid_pipeline() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["run", "answer_question", "--input", r#"{"query": "why"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("answer_question"));
}

#[test]
fn test_run_rejects_malformed_input() {
    let dir = workspace();
    loom_with_services(dir.path())
        .args(["run", "document_ingestion", "--input", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid JSON"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_defaults() {
    let dir = TempDir::new().unwrap();
    loom(dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("No config files loaded"))
        .stdout(predicate::str::contains("document_chunks"));
}

#[test]
fn test_config_init_then_which() {
    let dir = TempDir::new().unwrap();
    loom(dir.path())
        .args(["config", "init", "--local"])
        .assert()
        .success();
    assert!(dir.path().join("loom.toml").is_file());

    loom(dir.path())
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ loaded"));

    loom(dir.path())
        .args(["config", "init", "--local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_init_writes_user_layer_in_config_dir() {
    let dir = TempDir::new().unwrap();
    let config_dir = TempDir::new().unwrap();
    loom(dir.path())
        .arg("--config-dir")
        .arg(config_dir.path())
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config_dir.path().join("config.toml").is_file());

    loom(dir.path())
        .arg("--config-dir")
        .arg(config_dir.path())
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("user"))
        .stdout(predicate::str::contains("✓ loaded"))
        .stdout(predicate::str::contains("· not found"));
}
