// tests/loader_validation.rs

//! Workflow JSON loading and validation through the public API.

mod common;

use std::io::Write;

use serde_json::json;
use tempfile::NamedTempFile;

use common::init_tracing;

use pardag::errors::PardagError;
use pardag::workflow::{load_workflow, parse_workflow};

#[test]
fn cycle_is_rejected_before_any_task_runs() {
    init_tracing();
    let err = parse_workflow(
        json!({
            "name": "cyclic",
            "tasks": [
                {"id": "a", "fn": "f", "deps": ["b"]},
                {"id": "b", "fn": "f", "deps": ["a"]}
            ]
        }),
        "cyclic",
    )
    .unwrap_err();

    match err {
        PardagError::Cycle(ref task) => {
            assert!(task == "a" || task == "b");
            assert_eq!(err.exit_code(), 2);
        }
        other => panic!("expected Cycle error, got {other:?}"),
    }
}

#[test]
fn unknown_dep_reports_the_offending_path() {
    let err = parse_workflow(
        json!({"tasks": [{"id": "a", "fn": "f", "deps": ["ghost"]}]}),
        "wf",
    )
    .unwrap_err();

    match err {
        PardagError::Schema { path, message } => {
            assert_eq!(path, "tasks[0].deps[0]");
            assert!(message.contains("ghost"));
        }
        other => panic!("expected Schema error, got {other:?}"),
    }
}

#[test]
fn load_workflow_uses_file_stem_as_default_name() {
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    write!(
        file,
        r#"{{"tasks": [{{"id": "a", "fn": "math.sum", "args": [[1, 2]]}}]}}"#
    )
    .unwrap();

    let wf = load_workflow(file.path()).unwrap();
    let stem = file
        .path()
        .file_stem()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert_eq!(wf.name, stem);
    assert_eq!(wf.len(), 1);
}

#[test]
fn invalid_json_is_a_schema_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{not json").unwrap();

    let err = load_workflow(file.path()).unwrap_err();
    assert!(matches!(err, PardagError::Schema { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn wrong_field_type_points_at_the_task() {
    let err = parse_workflow(
        json!({"tasks": [
            {"id": "ok", "fn": "f"},
            {"id": "bad", "fn": "f", "tags": "io"}
        ]}),
        "wf",
    )
    .unwrap_err();

    match err {
        PardagError::Schema { path, .. } => assert_eq!(path, "tasks[1]"),
        other => panic!("expected Schema error, got {other:?}"),
    }
}
