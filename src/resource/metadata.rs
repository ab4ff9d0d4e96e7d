/// Resource metadata objects and the registration patch merge rule
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Closed set of output kinds a resource can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Tabular data
    Dataframe,
    /// Delimited text
    Csv,
    /// Chart or image (HTML or PNG)
    Visualization,
    /// Formatted document
    Markdown,
    /// Structured data
    Json,
}

impl OutputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataframe => "dataframe",
            Self::Csv => "csv",
            Self::Visualization => "visualization",
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dataframe" => Ok(Self::Dataframe),
            "csv" => Ok(Self::Csv),
            "visualization" => Ok(Self::Visualization),
            "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid output type: {}. Use: dataframe, csv, visualization, markdown, json",
                other
            )),
        }
    }
}

/// Declared type of a resource variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Str,
    Bool,
    Int,
    Float,
    Dict,
    List,
}

impl FromStr for VariableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" => Ok(Self::Str),
            "bool" => Ok(Self::Bool),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "dict" => Ok(Self::Dict),
            "list" => Ok(Self::List),
            other => Err(format!(
                "Invalid variable type: {}. Use: str, bool, int, float, dict, list",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub var_type: Option<VariableType>,
}

/// Identity of a symbol: `<relative source path>:<symbol>`
pub fn resource_id(source_path: &Path, symbol: &str) -> String {
    let path = source_path.to_string_lossy().replace('\\', "/");
    format!("{}:{}", path, symbol)
}

/// Description of one registered resource
///
/// Objects are never mutated in place: [`MetadataObject::apply`] copies the
/// untouched fields forward into a new object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataObject {
    /// `<relative source path>:<symbol>`
    pub id: String,
    pub name: String,
    pub symbol: String,
    /// Declaring file, relative to the project root
    pub source_path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub variables: IndexMap<String, VariableSpec>,
    #[serde(default)]
    pub data_requirements: Vec<String>,
    #[serde(default)]
    pub output_paths: Vec<String>,
    #[serde(default)]
    pub output_type: Option<OutputType>,
    #[serde(default)]
    pub connection: Option<String>,
    #[serde(default)]
    pub result_cache_ttl: Option<u64>,
    #[serde(default)]
    pub runtime: Option<String>,
}

impl MetadataObject {
    /// Fresh object for `symbol` declared in `source_path` (relative to the project root)
    pub fn new(source_path: &Path, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            id: resource_id(source_path, &symbol),
            name: symbol.clone(),
            symbol,
            source_path: source_path.to_path_buf(),
            description: None,
            title: None,
            variables: IndexMap::new(),
            data_requirements: Vec::new(),
            output_paths: Vec::new(),
            output_type: None,
            connection: None,
            result_cache_ttl: None,
            runtime: None,
        }
    }

    /// Fresh object for a `<path>:<symbol>` identity
    pub fn from_id(id: &str) -> Option<Self> {
        let (path, symbol) = id.rsplit_once(':')?;
        if path.is_empty() || symbol.is_empty() {
            return None;
        }
        Some(Self::new(Path::new(path), symbol))
    }

    /// Build the next version of this object with `patch` merged over it
    pub fn apply(&self, patch: &ResourcePatch) -> Self {
        let mut variables = self.variables.clone();
        for (name, spec) in &patch.variables {
            variables.insert(name.clone(), spec.clone());
        }

        let mut data_requirements = self.data_requirements.clone();
        data_requirements.extend(patch.data_requirements.iter().cloned());

        let mut output_paths = self.output_paths.clone();
        output_paths.extend(patch.output_paths.iter().cloned());

        Self {
            id: self.id.clone(),
            name: patch.name.clone().unwrap_or_else(|| self.name.clone()),
            symbol: self.symbol.clone(),
            source_path: self.source_path.clone(),
            description: patch.description.clone().or_else(|| self.description.clone()),
            title: patch.title.clone().or_else(|| self.title.clone()),
            variables,
            data_requirements,
            output_paths,
            output_type: patch.output_type.or(self.output_type),
            connection: patch.connection.clone().or_else(|| self.connection.clone()),
            result_cache_ttl: patch.result_cache_ttl.or(self.result_cache_ttl),
            runtime: patch.runtime.clone().or_else(|| self.runtime.clone()),
        }
    }

    /// Requirements with duplicates removed, declaration order kept
    pub fn unique_requirements(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.data_requirements
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// Partial declaration produced by a single registration call
///
/// Scalars set here win over the current object; `variables` merge by key,
/// `data_requirements` and `output_paths` are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub title: Option<String>,
    pub variables: IndexMap<String, VariableSpec>,
    pub data_requirements: Vec<String>,
    pub output_paths: Vec<String>,
    pub output_type: Option<OutputType>,
    pub connection: Option<String>,
    pub result_cache_ttl: Option<u64>,
    pub runtime: Option<String>,
}

impl ResourcePatch {
    pub fn variable(name: impl Into<String>, spec: VariableSpec) -> Self {
        let mut variables = IndexMap::new();
        variables.insert(name.into(), spec);
        Self {
            variables,
            ..Default::default()
        }
    }

    pub fn load_data(name: impl Into<String>) -> Self {
        Self {
            data_requirements: vec![name.into()],
            ..Default::default()
        }
    }
}
