// src/workflow/loader.rs

use std::fs;
use std::path::Path;

use crate::errors::{PardagError, Result};
use crate::workflow::model::{TaskSpec, Workflow, WorkflowDoc};
use crate::workflow::validate::validate_workflow;

/// Parse a workflow from an in-memory JSON document.
///
/// `default_name` is used when the document carries no `name` (the CLI
/// passes the file stem). Tasks are deserialized one by one so schema
/// errors can point at the offending element.
pub fn parse_workflow(doc: serde_json::Value, default_name: &str) -> Result<Workflow> {
    let doc: WorkflowDoc = serde_json::from_value(doc)
        .map_err(|e| PardagError::schema("$", e.to_string()))?;

    let name = doc
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_name.to_string());

    let mut tasks = Vec::with_capacity(doc.tasks.len());
    for (i, raw) in doc.tasks.into_iter().enumerate() {
        let task: TaskSpec = serde_json::from_value(raw)
            .map_err(|e| PardagError::schema(format!("tasks[{i}]"), e.to_string()))?;
        tasks.push(task);
    }

    validate_workflow(name, tasks)
}

/// Read, parse and validate a workflow JSON file.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| PardagError::schema("$", format!("invalid JSON in {path:?}: {e}")))?;

    let default_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string());

    parse_workflow(doc, &default_name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::PardagError;
    use crate::value::Value;

    #[test]
    fn parses_defaults() {
        let wf = parse_workflow(
            json!({
                "name": "demo",
                "tasks": [{"id": "a", "fn": "math.sum", "args": [[1, 2]]}]
            }),
            "fallback",
        )
        .unwrap();

        assert_eq!(wf.name, "demo");
        let a = wf.get("a").unwrap();
        assert!(a.deps.is_empty());
        assert_eq!(a.retries, 0);
        assert_eq!(a.timeout, None);
        assert!(a.tags.is_empty());
        assert!(a.cacheable);
        assert_eq!(
            a.args,
            vec![Value::Seq(vec![Value::Int(1), Value::Int(2)])]
        );
    }

    #[test]
    fn missing_name_falls_back_to_default() {
        let wf = parse_workflow(
            json!({"tasks": [{"id": "a", "fn": "f"}]}),
            "from-file-stem",
        )
        .unwrap();
        assert_eq!(wf.name, "from-file-stem");
    }

    #[test]
    fn negative_retries_is_a_schema_error_with_path() {
        let err = parse_workflow(
            json!({"tasks": [{"id": "a", "fn": "f", "retries": -1}]}),
            "wf",
        )
        .unwrap_err();
        match err {
            PardagError::Schema { path, .. } => assert_eq!(path, "tasks[0]"),
            other => panic!("expected Schema error, got {other:?}"),
        }
    }

    #[test]
    fn non_object_task_is_a_schema_error() {
        let err = parse_workflow(json!({"tasks": ["oops"]}), "wf").unwrap_err();
        assert!(matches!(err, PardagError::Schema { .. }));
    }

    #[test]
    fn exit_code_for_schema_and_cycle_errors_is_2() {
        let schema = parse_workflow(json!({"tasks": []}), "wf").unwrap_err();
        assert_eq!(schema.exit_code(), 2);

        let cycle = parse_workflow(
            json!({"tasks": [
                {"id": "a", "fn": "f", "deps": ["b"]},
                {"id": "b", "fn": "f", "deps": ["a"]}
            ]}),
            "wf",
        )
        .unwrap_err();
        assert_eq!(cycle.exit_code(), 2);
    }
}
