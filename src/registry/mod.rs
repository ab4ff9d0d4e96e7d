/// Resource registry
///
/// Process-local table of [`MetadataObject`]s keyed by identity. The registry
/// is constructed explicitly and shared through `Arc`; nothing in the engine
/// reaches for a global instance.
mod scanner;

pub use scanner::ScanReport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RegistrationError, Result, WeftError};
use crate::resource::{MetadataObject, ResourcePatch};
use crate::state::{read_json, write_json_atomic};

/// On-disk registry document
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub resources: Vec<MetadataObject>,
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct Registry {
    objects: RwLock<BTreeMap<String, MetadataObject>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, MetadataObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, MetadataObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install or update the object for `id`
    ///
    /// The current object (or a fresh one derived from the identity) is read,
    /// the patch is merged over it, and the result replaces it.
    pub fn register(&self, id: &str, patch: &ResourcePatch) -> Result<MetadataObject> {
        let mut objects = self.write();

        let current = match objects.get(id) {
            Some(existing) => existing.clone(),
            None => MetadataObject::from_id(id).ok_or_else(|| {
                WeftError::Registration(RegistrationError::new(
                    id,
                    "identity must have the form <path>:<symbol>",
                ))
            })?,
        };

        let next = current.apply(patch);
        objects.insert(id.to_string(), next.clone());

        tracing::debug!(resource = %next.name, id = %id, "registered resource");
        Ok(next)
    }

    /// Replace the object with the same identity wholesale
    pub fn install(&self, object: MetadataObject) {
        self.write().insert(object.id.clone(), object);
    }

    pub fn get(&self, id: &str) -> Option<MetadataObject> {
        self.read().get(id).cloned()
    }

    /// All live objects claiming `name`, ordered by identity
    pub fn find_by_name(&self, name: &str) -> Vec<MetadataObject> {
        self.read()
            .values()
            .filter(|object| object.name == name)
            .cloned()
            .collect()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.read().values().any(|object| object.name == name)
    }

    /// Resolve a name or alias to exactly one object
    pub fn lookup_by_name(&self, name: &str) -> Result<MetadataObject> {
        let mut matches = self.find_by_name(name);
        match matches.len() {
            0 => Err(WeftError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(WeftError::Conflict {
                name: name.to_string(),
                ids: matches.into_iter().map(|object| object.id).collect(),
            }),
        }
    }

    /// Snapshot of every object, ordered by identity
    pub fn list(&self) -> Vec<MetadataObject> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every object (start a new generation)
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Write the registry snapshot document
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            resources: self.list(),
        };
        write_json_atomic(path, &snapshot)?;

        tracing::debug!(
            operation = "save",
            entry_count = snapshot.resources.len(),
            path = %path.display(),
            "registry snapshot saved"
        );
        Ok(())
    }

    /// Replace the registry contents with a saved snapshot
    ///
    /// Returns the number of objects loaded; a missing file loads nothing.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let Some(snapshot) = read_json::<RegistrySnapshot>(path)? else {
            return Ok(0);
        };

        let mut objects = self.write();
        objects.clear();
        for object in snapshot.resources {
            objects.insert(object.id.clone(), object);
        }

        tracing::debug!(
            operation = "load",
            entry_count = objects.len(),
            path = %path.display(),
            "registry snapshot loaded"
        );
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{OutputType, VariableSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn named(name: &str) -> ResourcePatch {
        ResourcePatch {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_composes_separate_calls() {
        let registry = Registry::new();
        let id = "src/example1.py:main";

        registry.register(id, &ResourcePatch::load_data("alias2")).unwrap();
        registry
            .register(
                id,
                &ResourcePatch::variable(
                    "score_limit",
                    VariableSpec {
                        required: true,
                        ..Default::default()
                    },
                ),
            )
            .unwrap();
        registry.register(id, &named("alias1")).unwrap();

        let object = registry.get(id).unwrap();
        assert_eq!(object.name, "alias1");
        assert_eq!(object.data_requirements, vec!["alias2"]);
        assert!(object.variables["score_limit"].required);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_malformed_identity() {
        let registry = Registry::new();
        let err = registry.register("no-symbol", &named("x")).unwrap_err();
        assert_eq!(err.kind(), "registration_error");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_not_found() {
        let registry = Registry::new();
        let err = registry.lookup_by_name("ghost").unwrap_err();
        assert!(matches!(err, WeftError::NotFound(ref name) if name == "ghost"));
    }

    #[test]
    fn test_lookup_conflict_is_reported_at_lookup() {
        let registry = Registry::new();
        registry.register("src/a.py:a", &named("shared")).unwrap();
        registry.register("src/b.py:b", &named("shared")).unwrap();

        match registry.lookup_by_name("shared").unwrap_err() {
            WeftError::Conflict { name, ids } => {
                assert_eq!(name, "shared");
                assert_eq!(ids, vec!["src/a.py:a", "src/b.py:b"]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("resources.json");

        let registry = Registry::new();
        registry
            .register(
                "src/report.py:main",
                &ResourcePatch {
                    name: Some("report".into()),
                    description: Some("Quarterly report".into()),
                    title: Some("Report".into()),
                    output_type: Some(OutputType::Markdown),
                    connection: Some("warehouse".into()),
                    result_cache_ttl: Some(600),
                    runtime: Some("python3".into()),
                    output_paths: vec!["out/{name}{ext}".into()],
                    ..ResourcePatch::variable(
                        "quarter",
                        VariableSpec {
                            default: Some(json!("Q1")),
                            required: false,
                            var_type: None,
                        },
                    )
                },
            )
            .unwrap();
        registry
            .register("src/report.py:main", &ResourcePatch::load_data("sales"))
            .unwrap();
        registry.save(&path).unwrap();

        let restored = Registry::new();
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert_eq!(restored.list(), registry.list());
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = Registry::new();
        registry.register("src/a.py:a", &named("a")).unwrap();
        registry.reset();
        assert!(registry.is_empty());
    }
}
