/// `weft run` command implementation
///
/// Scans (fully or partially), runs the target, and persists registry and
/// cache. Output paths of the target go to stdout; progress goes to stderr.
use anyhow::{Context, Result};
use tokio_stream::StreamExt;

use super::{open_workspace, print_scan_errors};
use crate::cli::RunArgs;
use crate::cli_utils::weft_prefix;
use crate::engine::variables::parse_cli_bindings;
use crate::engine::{RunMode, RunOptions, RunReport, RunState, StreamChunk};
use crate::workspace::Workspace;

pub async fn run(project_dir: Option<&str>, args: &RunArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;

    let scan = if args.partial {
        workspace
            .registry()
            .scan_partial(workspace.root(), workspace.config(), &args.name)
    } else {
        workspace
            .registry()
            .scan_all(workspace.root(), workspace.config())
    };
    print_scan_errors(&scan);

    let variables = parse_cli_bindings(&args.vars).map_err(anyhow::Error::msg)?;

    if args.stream {
        return stream(workspace, args, variables).await;
    }

    let options = RunOptions {
        mode: if args.dag { RunMode::Dag } else { RunMode::Single },
        reuse_cache: args.reuse_cache,
        run_id: args.run_id.clone(),
    };

    let engine = workspace.engine().clone();
    let name = args.name.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.run(&name, &variables, &options))
        .await
        .context("Run task failed")?;

    // Earlier steps' cache entries stay valid even when a later step failed
    workspace.persist()?;

    let report = outcome.with_context(|| format!("Failed to run '{}'", args.name))?;
    print_report(&report, args.json)?;

    match report.failure() {
        Some(record) => {
            let message = record
                .error
                .as_ref()
                .map(|payload| payload.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Resource '{}' failed: {}", record.resource_name, message)
        }
        None => Ok(()),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for record in &report.records {
        let status = match (record.state, record.cached) {
            (RunState::Done, true) => "cached",
            (state, _) => state.as_str(),
        };
        eprintln!("{} {} {}", weft_prefix(), record.resource_name, status);
    }

    if let Some(record) = report.target_record() {
        for path in &record.output_paths {
            println!("{}", path.display());
        }
    }

    Ok(())
}

async fn stream(
    workspace: Workspace,
    args: &RunArgs,
    variables: serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let mut chunks = workspace
        .engine()
        .run_streaming(&args.name, &variables)
        .with_context(|| format!("Failed to run '{}'", args.name))?;

    let mut failure = None;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            StreamChunk::Data(data) => println!("{}", data),
            StreamChunk::Error(payload) => failure = Some(payload),
        }
    }

    workspace.persist()?;

    if let Some(payload) = failure {
        anyhow::bail!("Resource '{}' failed: {}", args.name, payload);
    }

    if let Some(paths) = workspace.engine().get_cached_outputs(&args.name) {
        for path in paths {
            eprintln!("{} Wrote {}", weft_prefix(), path.display());
        }
    }

    Ok(())
}
