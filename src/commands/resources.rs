/// `weft resources` command implementation
use anyhow::Result;

use super::open_workspace;
use crate::cli::ResourcesArgs;
use crate::cli_utils::{format_ttl, weft_prefix};

pub fn run(project_dir: Option<&str>, args: &ResourcesArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;
    let resources = workspace.registry().list();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }

    if resources.is_empty() {
        eprintln!("{} No resources registered. Run `weft scan` first.", weft_prefix());
        return Ok(());
    }

    println!("Registered resources ({}):", resources.len());
    println!();
    for resource in &resources {
        println!("  {}", resource.name);
        println!("    Source: {}", resource.id);
        if let Some(description) = &resource.description {
            println!("    Description: {}", description);
        }
        if let Some(output_type) = resource.output_type {
            println!("    Output type: {}", output_type);
        }
        if !resource.variables.is_empty() {
            let names: Vec<String> = resource
                .variables
                .iter()
                .map(|(name, spec)| {
                    if spec.required {
                        format!("{} (required)", name)
                    } else {
                        name.clone()
                    }
                })
                .collect();
            println!("    Variables: {}", names.join(", "));
        }
        let requirements = resource.unique_requirements();
        if !requirements.is_empty() {
            println!("    Requires: {}", requirements.join(", "));
        }
        println!("    Cache TTL: {}", format_ttl(resource.result_cache_ttl));
    }

    Ok(())
}
