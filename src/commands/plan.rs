/// `weft plan` command implementation
///
/// Prints the order in which a DAG run would execute resources.
use anyhow::{Context, Result};

use super::{open_workspace, print_scan_errors};
use crate::cli::PlanArgs;

pub fn run(project_dir: Option<&str>, args: &PlanArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;
    let report = workspace
        .registry()
        .scan_all(workspace.root(), workspace.config());
    print_scan_errors(&report);
    workspace.persist()?;

    let plan = workspace
        .engine()
        .plan(&args.name)
        .with_context(|| format!("Failed to plan '{}'", args.name))?;

    if args.json {
        let steps: Vec<_> = plan
            .iter()
            .map(|r| serde_json::json!({ "name": r.name, "id": r.id }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    for (index, resource) in plan.iter().enumerate() {
        println!("{:>3}. {} ({})", index + 1, resource.name, resource.id);
    }

    Ok(())
}
