/// `weft serve` command implementation
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use super::{open_workspace, print_scan_errors};
use crate::cli::ServeArgs;
use crate::http::server::HttpServer;

pub async fn run(project_dir: Option<&str>, args: &ServeArgs) -> Result<()> {
    let workspace = open_workspace(project_dir)?;

    let report = workspace
        .registry()
        .scan_all(workspace.root(), workspace.config());
    print_scan_errors(&report);
    workspace.persist()?;

    let bind = bind_address(&workspace.config().server.bind, args.port)?;

    info!("Starting HTTP server");
    info!("  Project: {}", workspace.root().display());
    info!("  Resources: {}", workspace.registry().len());
    info!("  Bind: {}", bind);

    HttpServer::new(bind, Arc::new(workspace)).run().await
}

/// Configured bind address, with the port replaced when one is given
fn bind_address(configured: &str, port: Option<u16>) -> Result<String> {
    let Some(port) = port else {
        return Ok(configured.to_string());
    };

    let mut addr: SocketAddr = configured
        .parse()
        .with_context(|| format!("Invalid server.bind address: {}", configured))?;
    addr.set_port(port);
    Ok(addr.to_string())
}
