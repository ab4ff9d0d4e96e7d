/// Project workspace: configuration, persisted state, and the wired engine
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::OutputCache;
use crate::config::WeftConfig;
use crate::engine::{Engine, ResourceRunner, ScriptRunner};
use crate::registry::Registry;
use crate::state::{self, CACHE_FILE, RESOURCES_FILE};

pub struct Workspace {
    root: PathBuf,
    engine: Engine,
}

impl Workspace {
    /// Open the project at `root` with the default script runner
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_runner(root, Arc::new(ScriptRunner::new()))
    }

    pub fn open_with_runner(root: &Path, runner: Arc<dyn ResourceRunner>) -> Result<Self> {
        let config = WeftConfig::load_or_default(root)
            .with_context(|| format!("Failed to load configuration for {}", root.display()))?;

        let registry = Arc::new(Registry::new());
        let cache = Arc::new(OutputCache::new());

        let resources_path = state::state_dir(root).join(RESOURCES_FILE);
        if let Err(e) = registry.load(&resources_path) {
            tracing::warn!(path = %resources_path.display(), error = %e, "ignoring unreadable registry snapshot");
            registry.reset();
        }

        let cache_path = state::state_dir(root).join(CACHE_FILE);
        if let Err(e) = cache.load(&cache_path) {
            tracing::warn!(path = %cache_path.display(), error = %e, "ignoring unreadable cache snapshot");
            cache.reset();
        }

        tracing::debug!(
            root = %root.display(),
            resources = registry.len(),
            cache_entries = cache.len(),
            "workspace opened"
        );

        let engine = Engine::new(registry, cache, runner, config, root.to_path_buf());
        Ok(Self {
            root: root.to_path_buf(),
            engine,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &WeftConfig {
        self.engine.config()
    }

    pub fn registry(&self) -> &Registry {
        self.engine.registry()
    }

    pub fn cache(&self) -> &OutputCache {
        self.engine.cache()
    }

    /// Write the registry and cache snapshots
    pub fn persist(&self) -> Result<()> {
        let dir = state::state_dir(&self.root);
        self.registry()
            .save(&dir.join(RESOURCES_FILE))
            .context("Failed to save registry snapshot")?;
        self.cache()
            .save(&dir.join(CACHE_FILE))
            .context("Failed to save cache snapshot")?;
        Ok(())
    }

    /// Forget every resource and cache entry and recreate an empty `.weft`
    pub fn clean(&self) -> Result<()> {
        self.registry().reset();
        self.cache().reset();

        let dir = state::weft_dir(&self.root);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        tracing::info!(path = %dir.display(), "workspace cleaned");
        Ok(())
    }
}
