use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Project configuration file name
pub const CONFIG_FILE_NAME: &str = "weft.toml";

/// Complete project configuration (loaded from `weft.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeftConfig {
    /// Directories scanned for resource files (relative to the project root)
    #[serde(default = "default_source_paths")]
    pub source_paths: Vec<String>,

    /// Output path templates used by resources that declare none
    #[serde(default = "default_output_paths")]
    pub output_paths: Vec<String>,

    /// Default result cache TTL in seconds (0 = always recompute)
    #[serde(default)]
    pub result_cache_ttl: u64,

    /// File extensions treated as resources
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Interpreter per file extension
    #[serde(default = "default_runtimes")]
    pub runtimes: BTreeMap<String, String>,

    /// Connection handed to resources that don't declare one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_connection: Option<String>,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for WeftConfig {
    fn default() -> Self {
        Self {
            source_paths: default_source_paths(),
            output_paths: default_output_paths(),
            result_cache_ttl: 0,
            extensions: default_extensions(),
            runtimes: default_runtimes(),
            default_connection: None,
            execution: ExecutionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Execution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Delay between forwarded chunks of a streaming run, in milliseconds
    #[serde(default = "default_stream_chunk_delay_ms")]
    pub stream_chunk_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            stream_chunk_delay_ms: default_stream_chunk_delay_ms(),
        }
    }
}

/// HTTP shell configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_source_paths() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_output_paths() -> Vec<String> {
    vec![".weft/output/{name}/{run_id}{ext}".to_string()]
}

fn default_extensions() -> Vec<String> {
    vec!["sql".to_string(), "py".to_string(), "sh".to_string()]
}

fn default_runtimes() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("py".to_string(), "python3".to_string()),
        ("sh".to_string(), "bash".to_string()),
        ("sql".to_string(), "duckdb".to_string()),
    ])
}

fn default_stream_chunk_delay_ms() -> u64 {
    20
}

fn default_bind() -> String {
    "127.0.0.1:9002".to_string()
}

impl WeftConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        // An empty project file is valid and means "all defaults"
        let config: WeftConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `weft.toml` from a project root, falling back to defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(root = %project_root.display(), "no weft.toml, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_paths.is_empty() {
            anyhow::bail!("source_paths must contain at least one directory");
        }

        if self.output_paths.is_empty() {
            anyhow::bail!("output_paths must contain at least one template");
        }

        for template in &self.output_paths {
            if !template.contains("{name}") && !template.contains("{run_id}") {
                anyhow::bail!(
                    "output_paths templates must contain {{name}} or {{run_id}}: {}",
                    template
                );
            }
        }

        if self.extensions.is_empty() {
            anyhow::bail!("extensions must not be empty");
        }

        Ok(())
    }

    /// Project default TTL for cached results
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl)
    }

    pub fn stream_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.execution.stream_chunk_delay_ms)
    }

    /// Whether a file is eligible for scanning
    pub fn is_resource_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false)
    }

    /// Interpreter configured for a file, by extension
    pub fn runtime_for(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.runtimes.get(ext).map(String::as_str)
    }
}
