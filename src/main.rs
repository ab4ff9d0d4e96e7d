use anyhow::Result;
use clap::Parser;

use weft::cli::{Cli, Commands};
use weft::{commands, logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();
    let project_dir = cli.project_dir.as_deref();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Scan(args) => commands::scan::run(project_dir, &args),
        Commands::Resources(args) => commands::resources::run(project_dir, &args),
        Commands::Plan(args) => commands::plan::run(project_dir, &args),
        Commands::Run(args) => commands::run::run(project_dir, &args).await,
        Commands::Cache(args) => commands::cache::cache(project_dir, &args),
        Commands::Clean => commands::clean::run(project_dir),
        Commands::Serve(args) => commands::serve::run(project_dir, &args).await,
    }
}
