/// Source scanning: discover resource files and install their declarations
///
/// Each file is described inside its own error boundary. A file's objects are
/// built completely before any of them is installed, so a broken file never
/// leaves half-registered objects behind and never touches objects installed
/// from other files.
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Registry;
use crate::config::WeftConfig;
use crate::error::RegistrationError;
use crate::resource::{describe_file, resource_id, MetadataObject};

/// Outcome of a scan
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files_scanned: usize,
    pub resources_installed: usize,
    pub errors: Vec<RegistrationError>,
    /// Partial scans only: the filename heuristic missed and every file was described
    pub fell_back_to_full: bool,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Registry {
    /// Scan every source root, starting a new registry generation
    pub fn scan_all(&self, project_root: &Path, config: &WeftConfig) -> ScanReport {
        let files = list_source_files(project_root, config);
        self.reset();

        let mut report = ScanReport::default();
        for file in &files {
            self.describe_and_install(project_root, file, &mut report);
        }

        tracing::info!(
            operation = "scan",
            files = report.files_scanned,
            resources = report.resources_installed,
            error_count = report.errors.len(),
            "full scan complete"
        );
        report
    }

    /// Describe only what is needed to resolve `target` and its requirements
    ///
    /// Files are picked by stem (or by the file an already known object came
    /// from); when a wanted name can't be found that way, all remaining files
    /// are described.
    pub fn scan_partial(&self, project_root: &Path, config: &WeftConfig, target: &str) -> ScanReport {
        let files = list_source_files(project_root, config);
        let mut described: HashSet<PathBuf> = HashSet::new();
        let mut report = ScanReport::default();

        let mut wanted: VecDeque<String> = VecDeque::from([target.to_string()]);
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(name) = wanted.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }

            let mut candidates: Vec<&PathBuf> = files
                .iter()
                .filter(|file| file.file_stem().is_some_and(|stem| stem == name.as_str()))
                .collect();
            let known_sources: Vec<PathBuf> = self
                .find_by_name(&name)
                .into_iter()
                .map(|object| object.source_path)
                .collect();
            candidates.extend(files.iter().filter(|file| known_sources.contains(*file)));

            for file in candidates {
                if described.insert(file.clone()) {
                    self.describe_and_install(project_root, file, &mut report);
                }
            }

            if !self.contains_name(&name) && !report.fell_back_to_full {
                tracing::debug!(resource = %name, "filename heuristic missed, describing all files");
                report.fell_back_to_full = true;
                for file in &files {
                    if described.insert(file.clone()) {
                        self.describe_and_install(project_root, file, &mut report);
                    }
                }
            }

            for object in self.find_by_name(&name) {
                for requirement in object.unique_requirements() {
                    if !visited.contains(requirement) {
                        wanted.push_back(requirement.to_string());
                    }
                }
            }
        }

        tracing::info!(
            operation = "scan_partial",
            target = %target,
            files = report.files_scanned,
            resources = report.resources_installed,
            error_count = report.errors.len(),
            fallback = report.fell_back_to_full,
            "partial scan complete"
        );
        report
    }

    fn describe_and_install(&self, project_root: &Path, rel_path: &Path, report: &mut ScanReport) {
        report.files_scanned += 1;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| build_objects(project_root, rel_path)));

        match outcome {
            Ok(Ok(objects)) => {
                report.resources_installed += objects.len();
                for object in objects {
                    self.install(object);
                }
            }
            Ok(Err(error)) => {
                tracing::warn!(path = %rel_path.display(), error = %error, "failed to register resource file");
                report.errors.push(error);
            }
            Err(_) => {
                let error = RegistrationError::new(rel_path, "panicked while describing file");
                tracing::error!(path = %rel_path.display(), "resource description panicked");
                report.errors.push(error);
            }
        }
    }
}

/// Describe one file and fold its declarations into complete objects
fn build_objects(
    project_root: &Path,
    rel_path: &Path,
) -> Result<Vec<MetadataObject>, RegistrationError> {
    let declarations = describe_file(&project_root.join(rel_path))
        .map_err(|e| RegistrationError::new(rel_path, format!("{:#}", e)))?;

    let mut objects: BTreeMap<String, MetadataObject> = BTreeMap::new();
    let mut declared_names: BTreeMap<String, String> = BTreeMap::new();

    for declaration in declarations {
        // Renaming a symbol follows the registry merge rule: the last name wins
        if let Some(name) = &declaration.patch.name {
            if let Some(previous) = declared_names.insert(declaration.symbol.clone(), name.clone()) {
                if previous != *name {
                    tracing::warn!(
                        path = %rel_path.display(),
                        symbol = %declaration.symbol,
                        previous = %previous,
                        name = %name,
                        "symbol declared under two names, keeping the last"
                    );
                }
            }
        }

        let id = resource_id(rel_path, &declaration.symbol);
        let current = objects
            .remove(&id)
            .unwrap_or_else(|| MetadataObject::new(rel_path, declaration.symbol.clone()));
        objects.insert(id, current.apply(&declaration.patch));
    }

    Ok(objects.into_values().collect())
}

/// Resource files under the configured source roots, relative and sorted
pub(crate) fn list_source_files(project_root: &Path, config: &WeftConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for source in &config.source_paths {
        let dir = project_root.join(source);
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "source path not found");
            continue;
        }

        let walker = WalkDir::new(&dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !config.is_resource_file(entry.path()) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(project_root) {
                files.push(rel.to_path_buf());
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}
