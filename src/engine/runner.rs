/// Resource runners
///
/// A runner executes one resource invocation. The engine owns planning,
/// caching, and output placement; the runner only turns an invocation into
/// bytes (or a stream of text chunks).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Command, Stdio};
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::error::{kinds, ErrorPayload};
use crate::resource::MetadataObject;

/// Everything a runner needs to execute one resource
#[derive(Debug, Clone)]
pub struct Invocation {
    pub resource: MetadataObject,
    pub project_root: PathBuf,
    pub run_id: String,
    pub variables: Map<String, Value>,
    /// Output paths of each upstream requirement, by requirement name
    pub upstream: BTreeMap<String, Vec<PathBuf>>,
    /// Interpreter chosen for the resource file
    pub runtime: Option<String>,
    /// Declared connection, or the project default
    pub connection: Option<String>,
}

impl Invocation {
    /// Absolute path of the resource's source file
    pub fn source_file(&self) -> PathBuf {
        self.project_root.join(&self.resource.source_path)
    }
}

/// Text chunks produced by a streaming invocation
pub type ChunkSource = Pin<Box<dyn Stream<Item = Result<String, ErrorPayload>> + Send>>;

pub trait ResourceRunner: Send + Sync {
    /// Run to completion and return the produced output
    fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, ErrorPayload>;

    /// Run and yield output incrementally
    ///
    /// A failure part-way ends the stream with an `Err` item.
    fn stream(&self, invocation: Invocation) -> ChunkSource;
}

/// Runs resource files with an external interpreter
///
/// Stdout is the resource output; a non-zero exit is an execution error
/// carrying stderr.
#[derive(Debug, Default, Clone)]
pub struct ScriptRunner;

impl ScriptRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(&self, invocation: &Invocation) -> Result<Command, ErrorPayload> {
        let runtime = invocation.runtime.as_deref().ok_or_else(|| {
            ErrorPayload::new(
                kinds::EXECUTION_ERROR,
                format!(
                    "No runtime configured for {}",
                    invocation.resource.source_path.display()
                ),
            )
        })?;

        // Fall back to the bare name and let spawn report it
        let runtime_path = which::which(runtime).unwrap_or_else(|e| {
            tracing::debug!(runtime = %runtime, error = %e, "runtime not found in PATH, trying as-is");
            PathBuf::from(runtime)
        });

        let mut cmd = Command::new(&runtime_path);
        cmd.arg(invocation.source_file());
        cmd.current_dir(&invocation.project_root);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.envs(environment(invocation));

        Ok(cmd)
    }
}

impl ResourceRunner for ScriptRunner {
    fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, ErrorPayload> {
        let start = Instant::now();
        let mut cmd = self.command(invocation)?;

        tracing::debug!(
            resource = %invocation.resource.name,
            run_id = %invocation.run_id,
            command = ?cmd,
            "executing resource"
        );

        let output = cmd.output().map_err(|e| spawn_failure(invocation, &e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::debug!(
            resource = %invocation.resource.name,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "resource process finished"
        );

        if !output.status.success() {
            return Err(exit_failure(
                invocation,
                exit_code,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        Ok(output.stdout)
    }

    fn stream(&self, invocation: Invocation) -> ChunkSource {
        let cmd = match self.command(&invocation) {
            Ok(cmd) => cmd,
            Err(payload) => {
                return Box::pin(tokio_stream::iter(std::iter::once(Err::<String, _>(payload))));
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(4);

        tokio::spawn(async move {
            let mut child = match tokio::process::Command::from(cmd).spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = tx.send(Err(spawn_failure(&invocation, &e))).await;
                    return;
                }
            };

            let stderr_task = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = stderr.read_to_string(&mut buf).await;
                    buf
                })
            });

            let mut consumer_gone = false;
            if let Some(stdout) = child.stdout.take() {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            // Keep draining so the process is never blocked on a full pipe
                            if !consumer_gone && tx.send(Ok(line)).await.is_err() {
                                consumer_gone = true;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let payload = ErrorPayload::new(
                                kinds::EXECUTION_ERROR,
                                format!("Failed to read output of '{}'", invocation.resource.name),
                            )
                            .with_detail(e.to_string());
                            let _ = tx.send(Err(payload)).await;
                            return;
                        }
                    }
                }
            }

            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let failure = exit_failure(&invocation, status.code().unwrap_or(-1), &stderr);
                    let _ = tx.send(Err(failure)).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(spawn_failure(&invocation, &e))).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

fn spawn_failure(invocation: &Invocation, error: &std::io::Error) -> ErrorPayload {
    ErrorPayload::new(
        kinds::EXECUTION_ERROR,
        format!(
            "Failed to spawn runtime '{}' for '{}'",
            invocation.runtime.as_deref().unwrap_or_default(),
            invocation.resource.name
        ),
    )
    .with_detail(error.to_string())
}

fn exit_failure(invocation: &Invocation, exit_code: i32, stderr: &str) -> ErrorPayload {
    ErrorPayload::new(
        kinds::EXECUTION_ERROR,
        format!(
            "Resource '{}' exited with code {}",
            invocation.resource.name, exit_code
        ),
    )
    .with_detail(stderr)
}

/// Environment handed to resource processes
pub fn environment(invocation: &Invocation) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("WEFT_RUN_ID".to_string(), invocation.run_id.clone());
    env.insert("WEFT_RESOURCE".to_string(), invocation.resource.name.clone());
    if let Some(connection) = &invocation.connection {
        env.insert("WEFT_CONNECTION".to_string(), connection.clone());
    }

    env.insert(
        "WEFT_VARS".to_string(),
        Value::Object(invocation.variables.clone()).to_string(),
    );
    for (name, value) in &invocation.variables {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(format!("WEFT_VAR_{}", env_suffix(name)), rendered);
    }

    let data: BTreeMap<&str, Vec<String>> = invocation
        .upstream
        .iter()
        .map(|(name, paths)| (name.as_str(), paths.iter().map(|p| display_path(p)).collect()))
        .collect();
    env.insert(
        "WEFT_DATA".to_string(),
        serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string()),
    );
    for (name, paths) in &invocation.upstream {
        if let Some(first) = paths.first() {
            env.insert(format!("WEFT_DATA_{}", env_suffix(name)), display_path(first));
        }
    }

    env
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `score-limit` -> `SCORE_LIMIT`
fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
