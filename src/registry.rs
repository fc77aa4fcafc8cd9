// src/registry.rs

//! Function registry: resolves a task's opaque `fn` string to a callable.
//!
//! The registry is built once before a run begins and is read-only
//! afterwards, so it can be shared freely across worker threads without
//! locking. Functions take the resolved canonical argument list and
//! return a canonical value or a message describing the failure; the
//! message becomes the `thrown` error descriptor on the attempt.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{PardagError, Result};
use crate::value::Value;

pub type TaskFn = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, TaskFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in task library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::tasks::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<TaskFn> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| PardagError::UnknownFunction(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.funcs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_unknown_function_fails() {
        let registry = FunctionRegistry::new();
        let err = match registry.resolve("nope") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, PardagError::UnknownFunction(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn registered_function_is_callable() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", |args: &[Value]| match args {
            [Value::Int(n)] => Ok(Value::Int(n * 2)),
            _ => Err("expected one integer".to_string()),
        });

        let f = registry.resolve("double").unwrap();
        assert_eq!(f(&[Value::Int(21)]), Ok(Value::Int(42)));
        assert!(f(&[]).is_err());
    }
}
