/// Execution engine
///
/// Runs a single resource or a whole dependency plan, reusing cached outputs
/// when allowed, and records one [`RunRecord`] per step. Registry, cache, and
/// runner are injected; the engine holds no global state besides the run id
/// counter.
pub mod run_record;
pub mod runner;
pub mod stream;
pub mod variables;

pub use run_record::{RunRecord, RunState, TransitionError};
pub use runner::{ChunkSource, Invocation, ResourceRunner, ScriptRunner};
pub use stream::{ChunkStream, StreamChunk};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::cache::{CacheEntry, OutputCache};
use crate::config::WeftConfig;
use crate::error::{kinds, ErrorPayload, Result, WeftError};
use crate::planner;
use crate::registry::Registry;
use crate::resource::output_kind::{self, render_output_path};
use crate::resource::{MetadataObject, OutputType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run only the target
    #[default]
    Single,
    /// Run the target's whole dependency plan
    Dag,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Single mode only: reuse any existing cache entry regardless of TTL
    pub reuse_cache: bool,
    /// Caller-chosen run id; generated when absent
    pub run_id: Option<String>,
}

/// Records of every step attempted for one invocation, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub mode: RunMode,
    pub run_id: String,
    pub records: Vec<RunRecord>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.state == RunState::Done)
    }

    /// The step that aborted the run, if any
    pub fn failure(&self) -> Option<&RunRecord> {
        self.records.iter().find(|r| r.state == RunState::Failed)
    }

    /// Record of the target itself, present only when it was reached
    pub fn target_record(&self) -> Option<&RunRecord> {
        self.records.last().filter(|r| r.resource_name == self.target)
    }
}

static LAST_RUN_ID: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp, strictly increasing within the process
pub fn next_run_id() -> String {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_RUN_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_RUN_ID.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    cache: Arc<OutputCache>,
    runner: Arc<dyn ResourceRunner>,
    config: Arc<WeftConfig>,
    project_root: PathBuf,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<OutputCache>,
        runner: Arc<dyn ResourceRunner>,
        config: WeftConfig,
        project_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            cache,
            runner,
            config: Arc::new(config),
            project_root,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<OutputCache> {
        &self.cache
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Look up a resource by name or alias
    pub fn resolve(&self, name: &str) -> Result<MetadataObject> {
        self.registry.lookup_by_name(name)
    }

    /// Ordered execution plan for `target`, target last
    pub fn plan(&self, target: &str) -> Result<Vec<MetadataObject>> {
        planner::plan(&self.registry, target)
    }

    /// Output paths of the last successful run of `name`
    pub fn get_cached_outputs(&self, name: &str) -> Option<Vec<PathBuf>> {
        let resource = self.resolve(name).ok()?;
        self.cache.get(&resource.id).map(|entry| entry.output_paths)
    }

    /// TTL a resource's cache entries are judged against
    pub fn effective_ttl(&self, resource: &MetadataObject) -> Duration {
        resource
            .result_cache_ttl
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_ttl())
    }

    /// Run `target` in the requested mode
    ///
    /// Every step gets its own run id, increasing in plan order; a caller
    /// supplied id names the target step. Lookup and planning failures are
    /// returned as errors. Step failures are recorded in the report; the
    /// first one aborts the rest of the plan.
    pub fn run(
        &self,
        target: &str,
        variables: &Map<String, Value>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let steps = match options.mode {
            RunMode::Single => vec![self.resolve(target)?],
            RunMode::Dag => self.plan(target)?,
        };

        let mut run_ids: Vec<String> = steps.iter().map(|_| next_run_id()).collect();
        if let (Some(requested), Some(last)) = (&options.run_id, run_ids.last_mut()) {
            *last = requested.clone();
        }
        let target_run_id = run_ids.last().cloned().unwrap_or_default();

        tracing::info!(
            resource = %target,
            run_id = %target_run_id,
            mode = ?options.mode,
            steps = steps.len(),
            "starting run"
        );

        let mut produced: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut claimed: HashSet<PathBuf> = HashSet::new();
        let mut records = Vec::with_capacity(steps.len());

        for (resource, run_id) in steps.iter().zip(&run_ids) {
            let record = match self.reusable_entry(resource, options) {
                Some(entry) => self.reuse_step(resource, run_id, entry)?,
                None => {
                    let upstream = self.upstream_outputs(resource, &produced);
                    self.execute_step(resource, run_id, variables, upstream, &claimed)?
                }
            };

            let failed = record.state == RunState::Failed;
            if record.state == RunState::Done {
                claimed.extend(record.output_paths.iter().cloned());
                produced.insert(resource.name.clone(), record.output_paths.clone());
            }
            records.push(record);

            if failed {
                tracing::warn!(
                    resource = %resource.name,
                    run_id = %run_id,
                    skipped = steps.len() - records.len(),
                    "step failed, aborting remaining plan"
                );
                break;
            }
        }

        Ok(RunReport {
            target: target.to_string(),
            mode: options.mode,
            run_id: target_run_id,
            records,
        })
    }

    /// Run `target` alone and forward its output chunk by chunk
    ///
    /// Lookup and binding errors are returned up front. Execution failures
    /// arrive in-band as a final [`StreamChunk::Error`]. On success the
    /// accumulated output is written and cached before the stream ends.
    pub fn run_streaming(&self, target: &str, variables: &Map<String, Value>) -> Result<ChunkStream> {
        let resource = self.resolve(target)?;
        let bindings = variables::resolve_bindings(&resource, variables)
            .map_err(|payload| WeftError::Request(payload.message))?;

        let run_id = next_run_id();
        let upstream = self.upstream_outputs(&resource, &BTreeMap::new());
        let invocation = self.invocation(&resource, &run_id, bindings, upstream);
        let mut source = self.runner.stream(invocation);

        let (tx, rx) = tokio::sync::mpsc::channel(stream::CHUNK_BUFFER);
        let delay = self.config.stream_chunk_delay();
        let engine = self.clone();

        tracing::info!(resource = %resource.name, run_id = %run_id, "starting streaming run");

        tokio::spawn(async move {
            let mut produced = String::new();

            while let Some(item) = source.next().await {
                match item {
                    Ok(data) => {
                        produced.push_str(&data);
                        produced.push('\n');
                        if tx.send(StreamChunk::Data(data)).await.is_err() {
                            tracing::debug!(resource = %resource.name, "stream consumer dropped");
                            return;
                        }
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    Err(payload) => {
                        tracing::warn!(
                            resource = %resource.name,
                            run_id = %run_id,
                            status = "failed",
                            error = %payload,
                            "streaming run failed"
                        );
                        let _ = tx.send(StreamChunk::Error(payload)).await;
                        return;
                    }
                }
            }

            match engine.write_outputs(&resource, &run_id, produced.as_bytes(), &HashSet::new()) {
                Ok((paths, kind)) => {
                    engine
                        .cache
                        .put(&resource.id, paths, resource.result_cache_ttl);
                    tracing::info!(
                        resource = %resource.name,
                        run_id = %run_id,
                        status = "done",
                        output_type = %kind,
                        "streaming run finished"
                    );
                }
                Err(payload) => {
                    let _ = tx.send(StreamChunk::Error(payload)).await;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn reusable_entry(&self, resource: &MetadataObject, options: &RunOptions) -> Option<CacheEntry> {
        let entry = self.cache.get(&resource.id)?;
        if !entry.output_paths.iter().all(|path| path.exists()) {
            tracing::debug!(resource = %resource.name, "cached outputs missing on disk");
            return None;
        }

        let reusable = match options.mode {
            RunMode::Single => options.reuse_cache,
            RunMode::Dag => OutputCache::is_fresh(&entry, self.effective_ttl(resource), Utc::now()),
        };
        reusable.then_some(entry)
    }

    fn reuse_step(&self, resource: &MetadataObject, run_id: &str, entry: CacheEntry) -> Result<RunRecord> {
        let mut record = RunRecord::new(resource, run_id);
        record.start()?;
        record.complete_from_cache(entry.output_paths)?;

        tracing::info!(
            resource = %resource.name,
            run_id = %run_id,
            status = "cached",
            "reusing cached output"
        );
        Ok(record)
    }

    fn execute_step(
        &self,
        resource: &MetadataObject,
        run_id: &str,
        variables: &Map<String, Value>,
        upstream: BTreeMap<String, Vec<PathBuf>>,
        claimed: &HashSet<PathBuf>,
    ) -> Result<RunRecord> {
        let mut record = RunRecord::new(resource, run_id);
        record.start()?;

        let bindings = match variables::resolve_bindings(resource, variables) {
            Ok(bindings) => bindings,
            Err(payload) => {
                tracing::warn!(resource = %resource.name, error = %payload, "invalid variable bindings");
                record.fail(payload)?;
                return Ok(record);
            }
        };
        record.bindings = bindings.clone();

        let invocation = self.invocation(resource, run_id, bindings, upstream);
        let outcome = self
            .runner
            .run(&invocation)
            .and_then(|bytes| self.write_outputs(resource, run_id, &bytes, claimed));

        match outcome {
            Ok((paths, kind)) => {
                record.complete(paths.clone(), Some(kind))?;
                self.cache.put(&resource.id, paths, resource.result_cache_ttl);
                tracing::info!(
                    resource = %resource.name,
                    run_id = %run_id,
                    status = "done",
                    output_type = %kind,
                    "step finished"
                );
            }
            Err(payload) => {
                tracing::warn!(
                    resource = %resource.name,
                    run_id = %run_id,
                    status = "failed",
                    error = %payload,
                    "step failed"
                );
                record.fail(payload)?;
            }
        }

        Ok(record)
    }

    fn invocation(
        &self,
        resource: &MetadataObject,
        run_id: &str,
        variables: Map<String, Value>,
        upstream: BTreeMap<String, Vec<PathBuf>>,
    ) -> Invocation {
        let runtime = resource
            .runtime
            .clone()
            .or_else(|| self.config.runtime_for(&resource.source_path).map(str::to_string));
        let connection = resource
            .connection
            .clone()
            .or_else(|| self.config.default_connection.clone());

        Invocation {
            resource: resource.clone(),
            project_root: self.project_root.clone(),
            run_id: run_id.to_string(),
            variables,
            upstream,
            runtime,
            connection,
        }
    }

    /// Outputs for each requirement: this run's first, then the cache
    fn upstream_outputs(
        &self,
        resource: &MetadataObject,
        produced: &BTreeMap<String, Vec<PathBuf>>,
    ) -> BTreeMap<String, Vec<PathBuf>> {
        resource
            .unique_requirements()
            .into_iter()
            .filter_map(|name| {
                let paths = produced
                    .get(name)
                    .cloned()
                    .or_else(|| self.get_cached_outputs(name))?;
                Some((name.to_string(), paths))
            })
            .collect()
    }

    /// Write produced bytes to every output path of `resource`
    ///
    /// Paths in `claimed` belong to earlier steps of the same run and are
    /// never overwritten.
    fn write_outputs(
        &self,
        resource: &MetadataObject,
        run_id: &str,
        bytes: &[u8],
        claimed: &HashSet<PathBuf>,
    ) -> std::result::Result<(Vec<PathBuf>, OutputType), ErrorPayload> {
        if bytes.is_empty() {
            return Err(ErrorPayload::new(
                kinds::EXECUTION_ERROR,
                format!("Resource '{}' produced no output", resource.name),
            ));
        }

        let resolved = output_kind::infer(resource.output_type, bytes);
        let templates = if resource.output_paths.is_empty() {
            &self.config.output_paths
        } else {
            &resource.output_paths
        };

        let mut paths = Vec::with_capacity(templates.len());
        for template in templates {
            let path = render_output_path(
                template,
                &resource.name,
                run_id,
                resolved.ext,
                &self.project_root,
            );
            if claimed.contains(&path) {
                return Err(ErrorPayload::new(
                    kinds::EXECUTION_ERROR,
                    format!(
                        "Output path {} of '{}' was already written by an earlier step of this run",
                        path.display(),
                        resource.name
                    ),
                )
                .with_detail("include {name} in the output path template"));
            }
            write_artifact(&path, bytes).map_err(|e| {
                ErrorPayload::new(
                    kinds::EXECUTION_ERROR,
                    format!("Failed to write output {}", path.display()),
                )
                .with_detail(e.to_string())
            })?;
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        Ok((paths, resolved.kind))
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourcePatch, VariableSpec, VariableType};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Handler = Box<dyn Fn(&Invocation) -> std::result::Result<Vec<u8>, ErrorPayload> + Send + Sync>;

    /// Runner that records every call and answers from per-resource handlers
    #[derive(Default)]
    struct FakeRunner {
        handlers: BTreeMap<String, Handler>,
        streams: BTreeMap<String, Vec<std::result::Result<String, ErrorPayload>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn on(
            mut self,
            name: &str,
            handler: impl Fn(&Invocation) -> std::result::Result<Vec<u8>, ErrorPayload> + Send + Sync + 'static,
        ) -> Self {
            self.handlers.insert(name.to_string(), Box::new(handler));
            self
        }

        fn streaming(mut self, name: &str, items: Vec<std::result::Result<String, ErrorPayload>>) -> Self {
            self.streams.insert(name.to_string(), items);
            self
        }

        fn calls_for(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
        }
    }

    impl ResourceRunner for FakeRunner {
        fn run(&self, invocation: &Invocation) -> std::result::Result<Vec<u8>, ErrorPayload> {
            let name = invocation.resource.name.clone();
            self.calls.lock().unwrap().push(name.clone());
            match self.handlers.get(&name) {
                Some(handler) => handler(invocation),
                None => Ok(format!("output of {}\n", name).into_bytes()),
            }
        }

        fn stream(&self, invocation: Invocation) -> ChunkSource {
            let name = invocation.resource.name.clone();
            self.calls.lock().unwrap().push(name.clone());
            let items = self.streams.get(&name).cloned().unwrap_or_default();
            Box::pin(tokio_stream::iter(items))
        }
    }

    struct Harness {
        temp: TempDir,
        engine: Engine,
        runner: Arc<FakeRunner>,
    }

    impl Harness {
        fn new(runner: FakeRunner, config: WeftConfig) -> Self {
            let temp = TempDir::new().unwrap();
            let runner = Arc::new(runner);
            let engine = Engine::new(
                Arc::new(Registry::new()),
                Arc::new(OutputCache::new()),
                runner.clone(),
                config,
                temp.path().to_path_buf(),
            );
            Self { temp, engine, runner }
        }

        fn add(&self, name: &str, requires: &[&str]) -> String {
            let id = format!("src/{}.sh:main", name);
            self.engine
                .registry()
                .register(
                    &id,
                    &ResourcePatch {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
            for requirement in requires {
                self.engine
                    .registry()
                    .register(&id, &ResourcePatch::load_data(*requirement))
                    .unwrap();
            }
            id
        }

        /// Cache entry for `id` aged `seconds`, with a real file behind it
        fn seed_cache(&self, id: &str, seconds: i64) -> CacheEntry {
            let path = self.temp.path().join(format!("seed/{}.txt", id.replace(['/', ':'], "_")));
            write_artifact(&path, b"seeded\n").unwrap();
            let entry = CacheEntry {
                output_paths: vec![path],
                timestamp: Utc::now() - ChronoDuration::seconds(seconds),
                ttl: None,
            };
            self.engine.cache().insert(id, entry.clone());
            entry
        }
    }

    fn dag() -> RunOptions {
        RunOptions {
            mode: RunMode::Dag,
            ..Default::default()
        }
    }

    fn config_with_ttl(ttl: u64) -> WeftConfig {
        let mut config = WeftConfig {
            result_cache_ttl: ttl,
            ..Default::default()
        };
        config.execution.stream_chunk_delay_ms = 0;
        config
    }

    #[test]
    fn test_run_ids_strictly_increase() {
        let ids: Vec<u64> = (0..50).map(|_| next_run_id().parse().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_dag_steps_get_increasing_run_ids() {
        let mut config = config_with_ttl(0);
        config.output_paths = vec![".weft/output/{run_id}{ext}".to_string()];
        assert!(config.validate().is_ok());

        let h = Harness::new(FakeRunner::default(), config);
        let b = h.add("B", &[]);
        h.add("A", &["B"]);

        let report = h.engine.run("A", &Map::new(), &dag()).unwrap();

        assert!(report.succeeded());
        let ids: Vec<u64> = report.records.iter().map(|r| r.run_id.parse().unwrap()).collect();
        assert!(ids[0] < ids[1]);
        assert_eq!(report.run_id, report.records[1].run_id);

        let cached_b = h.engine.cache().get(&b).unwrap();
        assert_eq!(fs::read_to_string(&cached_b.output_paths[0]).unwrap(), "output of B\n");
    }

    #[test]
    fn test_step_never_overwrites_earlier_step_output() {
        let mut config = config_with_ttl(0);
        config.output_paths = vec![".weft/output/{run_id}{ext}".to_string()];

        let h = Harness::new(FakeRunner::default(), config);
        let b = h.add("B", &[]);
        h.add("A", &["B"]);

        let options = RunOptions {
            run_id: Some("5".into()),
            ..Default::default()
        };
        let report = h.engine.run("B", &Map::new(), &options).unwrap();
        assert!(report.succeeded());

        let claimed: HashSet<PathBuf> = report.records[0].output_paths.iter().cloned().collect();
        let a = h.engine.resolve("A").unwrap();
        let err = h
            .engine
            .write_outputs(&a, "5", b"output of A\n", &claimed)
            .unwrap_err();
        assert_eq!(err.kind, "execution_error");

        let cached_b = h.engine.cache().get(&b).unwrap();
        assert_eq!(fs::read_to_string(&cached_b.output_paths[0]).unwrap(), "output of B\n");
    }

    #[test]
    fn test_default_connection_applies_when_undeclared() {
        let mut config = config_with_ttl(0);
        config.default_connection = Some("warehouse".into());

        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let plain_log = seen.clone();
        let pinned_log = seen.clone();
        let runner = FakeRunner::default()
            .on("plain", move |inv: &Invocation| {
                plain_log.lock().unwrap().push(inv.connection.clone());
                Ok(b"plain\n".to_vec())
            })
            .on("pinned", move |inv: &Invocation| {
                pinned_log.lock().unwrap().push(inv.connection.clone());
                Ok(b"pinned\n".to_vec())
            });
        let h = Harness::new(runner, config);
        h.add("plain", &[]);
        let pinned = h.add("pinned", &[]);
        h.engine
            .registry()
            .register(
                &pinned,
                &ResourcePatch {
                    connection: Some("sandbox".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        for name in ["plain", "pinned"] {
            let report = h.engine.run(name, &Map::new(), &RunOptions::default()).unwrap();
            assert!(report.succeeded());
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("warehouse".to_string()), Some("sandbox".to_string())]
        );
    }

    #[test]
    fn test_single_run_writes_output_and_caches() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let id = h.add("a", &[]);

        let options = RunOptions {
            run_id: Some("100".into()),
            ..Default::default()
        };
        let report = h.engine.run("a", &Map::new(), &options).unwrap();

        assert!(report.succeeded());
        let record = report.target_record().unwrap();
        let expected = h.temp.path().join(".weft/output/a/100.md");
        assert_eq!(record.output_paths, vec![expected.clone()]);
        assert_eq!(record.output_type, Some(OutputType::Markdown));
        assert_eq!(fs::read_to_string(&expected).unwrap(), "output of a\n");
        assert_eq!(h.engine.cache().get(&id).unwrap().output_paths, vec![expected]);
    }

    #[test]
    fn test_dag_fresh_cache_skips_upstream() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(3600));
        let b = h.add("B", &[]);
        h.add("A", &["B"]);
        let seeded = h.seed_cache(&b, 60);

        let report = h.engine.run("A", &Map::new(), &dag()).unwrap();

        assert!(report.succeeded());
        assert_eq!(h.runner.calls_for("B"), 0);
        assert_eq!(h.runner.calls_for("A"), 1);
        assert!(report.records[0].cached);
        assert_eq!(report.records[0].output_paths, seeded.output_paths);
        assert!(!report.records[1].cached);
    }

    #[test]
    fn test_dag_stale_cache_reruns_upstream() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(60));
        let b = h.add("B", &[]);
        h.add("A", &["B"]);
        let seeded = h.seed_cache(&b, 7200);

        let report = h.engine.run("A", &Map::new(), &dag()).unwrap();

        assert!(report.succeeded());
        assert_eq!(h.runner.calls_for("B"), 1);
        assert_eq!(h.runner.calls_for("A"), 1);
        let refreshed = h.engine.cache().get(&b).unwrap();
        assert!(refreshed.timestamp > seeded.timestamp);
        assert_ne!(refreshed.output_paths, seeded.output_paths);
    }

    #[test]
    fn test_resource_ttl_overrides_project_default() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let b = h.add("B", &[]);
        h.engine
            .registry()
            .register(
                &b,
                &ResourcePatch {
                    result_cache_ttl: Some(3600),
                    ..Default::default()
                },
            )
            .unwrap();
        h.add("A", &["B"]);
        h.seed_cache(&b, 60);

        h.engine.run("A", &Map::new(), &dag()).unwrap();
        assert_eq!(h.runner.calls_for("B"), 0);
    }

    #[test]
    fn test_zero_ttl_always_recomputes() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let b = h.add("B", &[]);
        h.seed_cache(&b, 0);

        h.engine.run("B", &Map::new(), &dag()).unwrap();
        assert_eq!(h.runner.calls_for("B"), 1);
    }

    #[test]
    fn test_single_mode_reuse_ignores_ttl() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let a = h.add("a", &[]);
        h.seed_cache(&a, 99_999);

        let report = h.engine.run("a", &Map::new(), &RunOptions::default()).unwrap();
        assert!(!report.records[0].cached);
        assert_eq!(h.runner.calls_for("a"), 1);

        let reuse = RunOptions {
            reuse_cache: true,
            ..Default::default()
        };
        let report = h.engine.run("a", &Map::new(), &reuse).unwrap();
        assert!(report.records[0].cached);
        assert_eq!(h.runner.calls_for("a"), 1);
    }

    #[test]
    fn test_failure_aborts_plan_without_cache_update() {
        let runner = FakeRunner::default().on("B", |_| {
            Err(ErrorPayload::new(kinds::EXECUTION_ERROR, "division by zero").with_detail("Traceback"))
        });
        let h = Harness::new(runner, config_with_ttl(0));
        let c = h.add("C", &[]);
        let b = h.add("B", &["C"]);
        h.add("A", &["B"]);

        let report = h.engine.run("A", &Map::new(), &dag()).unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.records.len(), 2);
        assert_eq!(h.runner.calls_for("A"), 0);
        assert!(report.target_record().is_none());

        let failed = report.failure().unwrap();
        assert_eq!(failed.resource_name, "B");
        let payload = failed.error.as_ref().unwrap();
        assert_eq!(payload.kind, "execution_error");
        assert_eq!(payload.detail.as_deref(), Some("Traceback"));

        assert!(h.engine.cache().get(&b).is_none());
        assert!(h.engine.cache().get(&c).is_some());
    }

    #[test]
    fn test_empty_output_fails() {
        let runner = FakeRunner::default().on("a", |_| Ok(Vec::new()));
        let h = Harness::new(runner, config_with_ttl(0));
        let a = h.add("a", &[]);

        let report = h.engine.run("a", &Map::new(), &RunOptions::default()).unwrap();
        let record = &report.records[0];
        assert_eq!(record.state, RunState::Failed);
        assert!(record.error.as_ref().unwrap().message.contains("no output"));
        assert!(h.engine.cache().get(&a).is_none());
    }

    #[test]
    fn test_missing_required_variable_is_request_error() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let id = h.add("a", &[]);
        h.engine
            .registry()
            .register(
                &id,
                &ResourcePatch::variable(
                    "score_limit",
                    VariableSpec {
                        required: true,
                        ..Default::default()
                    },
                ),
            )
            .unwrap();

        let report = h.engine.run("a", &Map::new(), &RunOptions::default()).unwrap();
        assert_eq!(report.records[0].error.as_ref().unwrap().kind, "request_error");
        assert_eq!(h.runner.calls_for("a"), 0);
    }

    #[test]
    fn test_planning_errors_are_returned() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        h.add("A", &["B"]);
        h.add("B", &["A"]);

        let err = h.engine.run("A", &Map::new(), &dag()).unwrap_err();
        assert_eq!(err.kind(), "cycle_detected");
        assert!(h.engine.run("ghost", &Map::new(), &dag()).is_err());
        assert!(h.runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_alias_score_filter() {
        let runner = FakeRunner::default()
            .on("alias2", |_| Ok(b"name,branch,score\nAlice,A,85\nBob,B,90\nCharlie,C,95\n".to_vec()))
            .on("alias1", |invocation| {
                let limit = invocation.variables["score_limit"].as_i64().unwrap();
                let upstream = &invocation.upstream["alias2"][0];
                let table = fs::read_to_string(upstream).unwrap();

                let mut lines = table.lines();
                let mut out = format!("{}\n", lines.next().unwrap());
                for line in lines {
                    let score: i64 = line.rsplit(',').next().unwrap().parse().unwrap();
                    if score > limit {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                Ok(out.into_bytes())
            });
        let h = Harness::new(runner, config_with_ttl(0));

        h.engine
            .registry()
            .register(
                "src/example2.py:main",
                &ResourcePatch {
                    name: Some("alias2".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let alias1_id = "src/example1.py:main";
        for patch in [
            ResourcePatch {
                name: Some("alias1".into()),
                ..Default::default()
            },
            ResourcePatch::variable(
                "score_limit",
                VariableSpec {
                    var_type: Some(VariableType::Int),
                    ..Default::default()
                },
            ),
            ResourcePatch::load_data("alias2"),
        ] {
            h.engine.registry().register(alias1_id, &patch).unwrap();
        }

        let mut vars = Map::new();
        vars.insert("score_limit".into(), json!("90"));
        let report = h.engine.run("alias1", &vars, &dag()).unwrap();

        assert!(report.succeeded());
        let names: Vec<_> = report.records.iter().map(|r| r.resource_name.as_str()).collect();
        assert_eq!(names, vec!["alias2", "alias1"]);

        let record = report.target_record().unwrap();
        assert_eq!(record.output_type, Some(OutputType::Csv));
        let output = fs::read_to_string(&record.output_paths[0]).unwrap();
        assert_eq!(output, "name,branch,score\nCharlie,C,95\n");
        assert_eq!(
            h.engine.get_cached_outputs("alias1"),
            Some(record.output_paths.clone())
        );
    }

    #[tokio::test]
    async fn test_stream_three_chunks_then_error() {
        let runner = FakeRunner::default().streaming(
            "s",
            vec![
                Ok("one".into()),
                Ok("two".into()),
                Ok("three".into()),
                Err(ErrorPayload::new(kinds::EXECUTION_ERROR, "raised part-way")),
            ],
        );
        let h = Harness::new(runner, config_with_ttl(0));
        let id = h.add("s", &[]);

        let chunks: Vec<StreamChunk> = h
            .engine
            .run_streaming("s", &Map::new())
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            chunks[..3],
            [
                StreamChunk::Data("one".into()),
                StreamChunk::Data("two".into()),
                StreamChunk::Data("three".into()),
            ]
        );
        assert_eq!(chunks.len(), 4);
        assert!(chunks[3].is_error());
        assert!(h.engine.cache().get(&id).is_none());
    }

    #[tokio::test]
    async fn test_stream_success_writes_and_caches() {
        let runner = FakeRunner::default()
            .streaming("s", vec![Ok("# Title".into()), Ok("body".into())]);
        let h = Harness::new(runner, config_with_ttl(0));
        let id = h.add("s", &[]);

        let chunks: Vec<StreamChunk> = h
            .engine
            .run_streaming("s", &Map::new())
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        let entry = h.engine.cache().get(&id).unwrap();
        assert_eq!(fs::read_to_string(&entry.output_paths[0]).unwrap(), "# Title\nbody\n");
    }

    #[tokio::test]
    async fn test_stream_unknown_target_fails_up_front() {
        let h = Harness::new(FakeRunner::default(), config_with_ttl(0));
        let err = h.engine.run_streaming("ghost", &Map::new()).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
