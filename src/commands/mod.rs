pub mod cache;
pub mod clean;
pub mod plan;
pub mod resources;
pub mod run;
pub mod scan;
pub mod serve;

use anyhow::Result;

use crate::cli_utils::weft_prefix;
use crate::config_discovery::resolve_project_root;
use crate::registry::ScanReport;
use crate::workspace::Workspace;

/// Open the workspace for `--project-dir` (or the discovered project)
pub(crate) fn open_workspace(project_dir: Option<&str>) -> Result<Workspace> {
    let root = resolve_project_root(project_dir)?;
    tracing::debug!(root = %root.display(), "using project root");
    Workspace::open(&root)
}

/// Print registration errors collected by a scan
pub(crate) fn print_scan_errors(report: &ScanReport) {
    for error in &report.errors {
        eprintln!("{} Skipped {}", weft_prefix(), error);
    }
}
