use clap::{Parser, Subcommand};

/// weft - Incremental resource orchestration
///
/// weft discovers resources declared in SQL, Python, and shell files, plans
/// their dependencies, and runs them while reusing cached outputs.
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(author = "Weft Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental resource orchestration", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to the nearest directory containing weft.toml)
    #[arg(long, global = true, env = "WEFT_PROJECT_DIR")]
    pub project_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan source paths and rebuild the resource registry
    Scan(ScanArgs),

    /// List registered resources
    Resources(ResourcesArgs),

    /// Show the execution plan for a resource
    Plan(PlanArgs),

    /// Run a resource (optionally with its dependencies)
    Run(RunArgs),

    /// Inspect cached outputs
    Cache(CacheArgs),

    /// Remove the registry, cache, and produced outputs
    Clean,

    /// Serve the run API over HTTP
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Exit with an error when any file fails to register
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Debug)]
pub struct ResourcesArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Resource name or alias
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Resource name or alias
    pub name: String,

    /// Run every upstream dependency first, reusing fresh cache entries
    #[arg(long, conflicts_with = "stream")]
    pub dag: bool,

    /// Reuse the last cached output of the target regardless of its age
    #[arg(long, conflicts_with = "dag")]
    pub reuse_cache: bool,

    /// Variable binding (repeatable): --var score_limit=90
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Run id of the target step (defaults to a millisecond timestamp)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Print output chunks as they are produced
    #[arg(long)]
    pub stream: bool,

    /// Only describe the files needed for this resource instead of a full scan
    #[arg(long)]
    pub partial: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show the cached outputs of a resource
    Show {
        /// Resource name or alias
        name: String,
    },

    /// List every cache entry
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides server.bind from weft.toml)
    #[arg(short, long, env = "WEFT_PORT")]
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "weft",
            "--project-dir",
            "/tmp/p",
            "run",
            "alias1",
            "--dag",
            "--var",
            "score_limit=90",
            "--var",
            "region=eu",
        ])
        .unwrap();

        assert_eq!(cli.project_dir.as_deref(), Some("/tmp/p"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.name, "alias1");
                assert!(args.dag);
                assert_eq!(args.vars, vec!["score_limit=90", "region=eu"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dag_conflicts_with_stream() {
        assert!(Cli::try_parse_from(["weft", "run", "a", "--dag", "--stream"]).is_err());
        assert!(Cli::try_parse_from(["weft", "run", "a", "--dag", "--reuse-cache"]).is_err());
    }

    #[test]
    fn test_cache_show() {
        let cli = Cli::try_parse_from(["weft", "cache", "show", "alias2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheArgs {
                command: CacheCommands::Show { ref name }
            }) if name == "alias2"
        ));
    }
}
