/// `weft scan` command implementation
///
/// Rebuilds the registry from every configured source path.
use anyhow::Result;

use super::{open_workspace, print_scan_errors};
use crate::cli::ScanArgs;
use crate::cli_utils::weft_prefix;

pub fn run(project_dir: Option<&str>, args: &ScanArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;
    let report = workspace
        .registry()
        .scan_all(workspace.root(), workspace.config());
    workspace.persist()?;

    print_scan_errors(&report);
    eprintln!(
        "{} Scanned {} files, registered {} resources",
        weft_prefix(),
        report.files_scanned,
        workspace.registry().len()
    );

    if args.strict && !report.is_clean() {
        anyhow::bail!("{} file(s) failed to register", report.errors.len());
    }

    Ok(())
}
