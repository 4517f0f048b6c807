use std::fs;

use assert_matches::assert_matches;

use post_structural::config::{Config, ConfigLoader, DEFAULT_PIPELINE_DIR, DEFAULT_THREADS, RunRequest};
use post_structural::domain::AtlasSelector;
use post_structural::error::PipelineError;
use post_structural::tools::Tool;

fn request(root: &std::path::Path) -> RunRequest {
    RunRequest {
        bids: root.display().to_string(),
        out: root.display().to_string(),
        participant: "HC001".to_string(),
        atlas: "DEFAULT".to_string(),
        library: Some(root.join("library").display().to_string()),
        ..RunRequest::default()
    }
}

#[test]
fn load_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("post-structural.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "pipeline_dir": "micapipe_v0.2.3",
            "threads": 8,
            "tools": { "wb_command": "/opt/workbench/bin/wb_command" }
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.threads, Some(8));

    let resolved = ConfigLoader::resolve(request(temp.path()), config).unwrap();
    assert_eq!(resolved.pipeline_dir, "micapipe_v0.2.3");
    assert_eq!(resolved.threads, 8);
    assert_eq!(
        resolved.tools.get(&Tool::WbCommand).unwrap(),
        &std::path::PathBuf::from("/opt/workbench/bin/wb_command")
    );
}

#[test]
fn defaults_apply_without_config() {
    let temp = tempfile::tempdir().unwrap();
    let resolved = ConfigLoader::resolve(request(temp.path()), Config::default()).unwrap();

    assert_eq!(resolved.threads, DEFAULT_THREADS);
    assert_eq!(resolved.pipeline_dir, DEFAULT_PIPELINE_DIR);
    assert_eq!(resolved.atlas, AtlasSelector::Default);
    assert!(resolved.subject.session.is_none());
    assert!(!resolved.force);
    assert!(!resolved.no_cleanup);
}

#[test]
fn unreadable_config_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::load(Some(path.to_str().unwrap())),
        Err(PipelineError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("post-structural.json");
    fs::write(&path, "{ threads: eight }").unwrap();
    assert_matches!(
        ConfigLoader::load(Some(path.to_str().unwrap())),
        Err(PipelineError::ConfigParse(_))
    );
}

#[test]
fn missing_output_root_is_a_precondition() {
    let temp = tempfile::tempdir().unwrap();
    let mut req = request(temp.path());
    req.out = temp.path().join("derivatives").display().to_string();

    let err = ConfigLoader::resolve(req, Config::default()).unwrap_err();
    assert_matches!(err, PipelineError::MissingInput { .. });
    assert!(err.is_precondition());
}

#[test]
fn invalid_participant_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let mut req = request(temp.path());
    req.participant = "sub-".to_string();
    assert_matches!(
        ConfigLoader::resolve(req, Config::default()),
        Err(PipelineError::InvalidParticipant(_))
    );
}

#[test]
fn library_prefers_command_line() {
    let config = Config {
        library_dir: Some("/srv/library".to_string()),
        ..Config::default()
    };
    let from_cli = ConfigLoader::resolve_library(Some("/opt/library".to_string()), &config).unwrap();
    assert_eq!(from_cli, "/opt/library");
    let from_file = ConfigLoader::resolve_library(None, &config).unwrap();
    assert_eq!(from_file, "/srv/library");
}
