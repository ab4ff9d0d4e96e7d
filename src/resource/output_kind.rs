/// Output kind resolution and output path templating
use std::path::{Path, PathBuf};

use super::metadata::OutputType;

/// Kind and file extension chosen for a produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub kind: OutputType,
    /// Extension including the leading dot
    pub ext: &'static str,
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const PARQUET_MAGIC: &[u8] = b"PAR1";

/// Resolve the output kind from the declared kind and the produced bytes
///
/// A declared kind always wins; the bytes only pick between the extensions
/// that kind allows. Undeclared outputs are sniffed.
pub fn infer(declared: Option<OutputType>, produced: &[u8]) -> ResolvedOutput {
    let kind = declared.unwrap_or_else(|| sniff(produced));

    let ext = match kind {
        OutputType::Dataframe => {
            if produced.starts_with(PARQUET_MAGIC) {
                ".parquet"
            } else {
                ".csv"
            }
        }
        OutputType::Csv => ".csv",
        OutputType::Visualization => {
            if produced.starts_with(PNG_MAGIC) {
                ".png"
            } else {
                ".html"
            }
        }
        OutputType::Markdown => ".md",
        OutputType::Json => ".json",
    };

    ResolvedOutput { kind, ext }
}

fn sniff(produced: &[u8]) -> OutputType {
    if produced.starts_with(PNG_MAGIC) {
        return OutputType::Visualization;
    }
    if produced.starts_with(PARQUET_MAGIC) {
        return OutputType::Dataframe;
    }

    let Ok(text) = std::str::from_utf8(produced) else {
        return OutputType::Markdown;
    };
    let trimmed = text.trim_start();

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
    {
        return OutputType::Json;
    }

    let lowered = trimmed.get(..trimmed.len().min(64)).unwrap_or_default().to_ascii_lowercase();
    if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
        return OutputType::Visualization;
    }

    if looks_delimited(text) {
        return OutputType::Csv;
    }

    OutputType::Markdown
}

/// At least two non-empty lines, each with the same non-zero comma count
fn looks_delimited(text: &str) -> bool {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return false;
    };
    let columns = header.matches(',').count();
    if columns == 0 {
        return false;
    }

    let mut rows = 0;
    for line in lines {
        if line.matches(',').count() != columns {
            return false;
        }
        rows += 1;
    }
    rows > 0
}

/// Render an output path template
///
/// Placeholders: `{name}`, `{run_id}`, `{ext}` (also written `{ext()}`).
/// Relative results are anchored at `project_root`.
pub fn render_output_path(
    template: &str,
    name: &str,
    run_id: &str,
    ext: &str,
    project_root: &Path,
) -> PathBuf {
    let rendered = template
        .replace("{name}", name)
        .replace("{run_id}", run_id)
        .replace("{ext()}", ext)
        .replace("{ext}", ext);

    let path = PathBuf::from(rendered);
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
