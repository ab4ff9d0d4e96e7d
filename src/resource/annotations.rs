/// KDL directive parser for resource files
///
/// This is the pure "describe" half of registration: it reads `WEFT`
/// directives out of comments and returns the declarations a file makes
/// without ever executing the file.
///
/// ```text
/// #WEFT resource "alias1" description="Filtered scores" output-type="csv"
/// #WEFT variable "score_limit" required=#true type="int"
/// #WEFT load-data "alias2"
/// ```
use anyhow::{anyhow, Context, Result};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::metadata::{OutputType, ResourcePatch, VariableSpec, VariableType};

/// One registration call found in a file
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub symbol: String,
    pub patch: ResourcePatch,
}

/// Comment prefixes recognised for a file, by extension
pub fn directive_prefixes(path: &Path) -> &'static [&'static str] {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "sql" => &["--WEFT"],
        "js" | "ts" | "mjs" => &["//WEFT"],
        "py" | "sh" | "bash" | "rb" | "pl" | "r" | "R" => &["#WEFT"],
        _ => &["#WEFT", "--WEFT", "//WEFT"],
    }
}

/// Symbol used by directives that don't name one: the file stem
pub fn default_symbol(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

/// Describe a resource file
pub fn describe_file(path: &Path) -> Result<Vec<Declaration>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read resource: {}", path.display()))?;
    describe_source(&content, path)
}

/// Describe already loaded source text; `path` selects prefixes and the default symbol
pub fn describe_source(content: &str, path: &Path) -> Result<Vec<Declaration>> {
    let prefixes = directive_prefixes(path);

    let mut kdl_lines = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        for prefix in prefixes {
            if let Some(directive) = trimmed.strip_prefix(prefix) {
                kdl_lines.push(directive.trim());
                break;
            }
        }
    }

    if kdl_lines.is_empty() {
        return Ok(Vec::new());
    }

    let kdl_text = kdl_lines.join("\n");
    let doc: KdlDocument = kdl_text
        .parse()
        .map_err(|e| anyhow!("Invalid KDL syntax: {}", e))?;

    let fallback_symbol = default_symbol(path);

    doc.nodes()
        .iter()
        .map(|node| {
            parse_kdl_node(node, &fallback_symbol)
                .with_context(|| format!("Failed to parse directive: {}", node.name()))
        })
        .collect()
}

fn parse_kdl_node(node: &KdlNode, fallback_symbol: &str) -> Result<Declaration> {
    let symbol = get_string_property(node, "symbol")?
        .unwrap_or_else(|| fallback_symbol.to_string());

    let patch = match node.name().value() {
        "resource" => {
            let name = get_positional_string(node, 0);
            let alias = get_string_property(node, "alias")?;

            let output_type = get_string_property(node, "output-type")?
                .map(|s| s.parse::<OutputType>().map_err(|e| anyhow!(e)))
                .transpose()?;

            let result_cache_ttl = match node.get("cache-ttl") {
                None => None,
                Some(value) => Some(parse_ttl(value)?),
            };

            ResourcePatch {
                name: alias.or(name),
                description: get_string_property(node, "description")?,
                title: get_string_property(node, "title")?,
                output_type,
                connection: get_string_property(node, "connection")?,
                result_cache_ttl,
                ..Default::default()
            }
        }

        "variable" => {
            let name = get_positional_string(node, 0)
                .ok_or_else(|| anyhow!("variable requires name argument"))?;

            let required = match node.get("required") {
                None => false,
                Some(value) => value
                    .as_bool()
                    .ok_or_else(|| anyhow!("required must be #true or #false"))?,
            };

            let var_type = get_string_property(node, "type")?
                .map(|s| s.parse::<VariableType>().map_err(|e| anyhow!(e)))
                .transpose()?;

            let default = node.get("default").map(kdl_to_json);

            ResourcePatch::variable(
                name,
                VariableSpec {
                    default,
                    required,
                    var_type,
                },
            )
        }

        "load-data" => {
            let name = get_positional_string(node, 0)
                .ok_or_else(|| anyhow!("load-data requires resource name"))?;
            ResourcePatch::load_data(name)
        }

        "output" => {
            let template = get_positional_string(node, 0)
                .ok_or_else(|| anyhow!("output requires path template"))?;
            ResourcePatch {
                output_paths: vec![template],
                ..Default::default()
            }
        }

        "runtime" => {
            let runtime = get_positional_string(node, 0)
                .ok_or_else(|| anyhow!("runtime requires interpreter name"))?;
            ResourcePatch {
                runtime: Some(runtime),
                ..Default::default()
            }
        }

        _ => {
            return Err(anyhow!("Unknown directive: {}", node.name()));
        }
    };

    Ok(Declaration { symbol, patch })
}

/// Get positional string argument from KDL node
fn get_positional_string(node: &KdlNode, index: usize) -> Option<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .nth(index)
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_property(node: &KdlNode, key: &str) -> Result<Option<String>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow!("{} must be a string", key)),
    }
}

fn kdl_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::Null
    }
}

/// TTL as integer seconds or a duration string ("30s", "10m", "2h", "7d")
fn parse_ttl(value: &KdlValue) -> Result<u64> {
    if let Some(seconds) = value.as_integer() {
        return u64::try_from(seconds).map_err(|_| anyhow!("cache-ttl must not be negative"));
    }
    let text = value
        .as_string()
        .ok_or_else(|| anyhow!("cache-ttl must be seconds or a duration string"))?;
    Ok(parse_duration(text)?.as_secs())
}

/// Parse duration string (e.g., "1h", "7d", "30d", "10m")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let Some((split, unit)) = s.char_indices().last() else {
        return Err(anyhow!("Empty duration string"));
    };

    let num: u64 = s[..split]
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: s, m, h, d", unit)),
    };

    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Duration too large: {}", s))?;
    Ok(Duration::from_secs(seconds))
}
