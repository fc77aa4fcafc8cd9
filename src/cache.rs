// src/cache.rs

//! Disk-backed result cache.
//!
//! One flat directory, one file per fingerprint: `<key>.v1` holding the
//! canonical JSON of the result value. Writes go through a temporary
//! sibling (`<key>.v1.tmp.<nonce>`) followed by an atomic rename, so
//! concurrent stores for the same key converge and readers never observe
//! a partial entry. Read errors are treated as misses; only write errors
//! surface, and callers log them without failing the task.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::errors::{PardagError, Result};
use crate::value::Value;

const ENTRY_SUFFIX: &str = ".v1";

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Cache over a directory, or a no-op when no directory is configured.
#[derive(Debug)]
pub struct ResultCache {
    dir: Option<PathBuf>,
}

impl ResultCache {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn at_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{key}{ENTRY_SUFFIX}")))
    }

    pub fn has(&self, key: &str) -> bool {
        self.entry_path(key).is_some_and(|p| p.is_file())
    }

    /// Look up a cached result. Any read or parse problem is a miss.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key)?;
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(key, error = %e, "cache read failed; treating as miss");
                }
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry; treating as miss");
                None
            }
        }
    }

    /// Store a result under its fingerprint.
    ///
    /// Idempotent per key: values are equal by construction, and the
    /// rename means the last writer wins without torn entries.
    pub fn store(&self, key: &str, value: &Value) -> Result<()> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        let path = dir.join(format!("{key}{ENTRY_SUFFIX}"));

        fs::create_dir_all(dir)
            .map_err(|e| PardagError::CacheWrite(format!("creating {dir:?}: {e}")))?;

        let payload = value
            .canonical_json()
            .map_err(|e| PardagError::CacheWrite(format!("serializing value for {key}: {e}")))?;

        let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(
            "{key}{ENTRY_SUFFIX}.tmp.{}-{nonce}",
            std::process::id()
        ));

        fs::write(&tmp, payload)
            .map_err(|e| PardagError::CacheWrite(format!("writing {tmp:?}: {e}")))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(PardagError::CacheWrite(format!(
                "renaming {tmp:?} into place: {e}"
            )));
        }
        Ok(())
    }

    /// Expose the directory for diagnostics.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

/// File name of a cache entry, as laid out on disk.
pub fn entry_file_name(key: &str) -> String {
    format!("{key}{ENTRY_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::at_dir(dir.path());
        let v = Value::Seq(vec![Value::Int(1), Value::Str("a".into())]);

        assert!(!cache.has("k1"));
        cache.store("k1", &v).unwrap();
        assert!(cache.has("k1"));
        assert_eq!(cache.lookup("k1"), Some(v));

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn entries_are_canonical_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::at_dir(dir.path());
        let mut m = std::collections::BTreeMap::new();
        m.insert("b".to_string(), Value::Int(2));
        m.insert("a".to_string(), Value::Int(1));
        cache.store("abc", &Value::Map(m)).unwrap();

        let on_disk = fs::read_to_string(dir.path().join(entry_file_name("abc"))).unwrap();
        assert_eq!(on_disk, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::at_dir(dir.path());
        fs::write(dir.path().join(entry_file_name("bad")), "{not json").unwrap();
        assert_eq!(cache.lookup("bad"), None);
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let cache = ResultCache::disabled();
        assert!(!cache.is_enabled());
        cache.store("k", &Value::Null).unwrap();
        assert!(!cache.has("k"));
        assert_eq!(cache.lookup("k"), None);
    }
}
