/// `weft clean` command implementation
use anyhow::Result;

use super::open_workspace;
use crate::cli_utils::weft_prefix;
use crate::state::weft_dir;

pub fn run(project_dir: Option<&str>) -> Result<()> {
    let workspace = open_workspace(project_dir)?;
    workspace.clean()?;

    eprintln!(
        "{} Removed registry, cache, and outputs under {}",
        weft_prefix(),
        weft_dir(workspace.root()).display()
    );
    Ok(())
}
