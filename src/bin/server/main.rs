use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use gitodo::git::GitBackend;
use gitodo::server;

#[derive(Parser)]
#[command(name = "gitodo-server", about = "Git-backed todo.txt file server", version)]
struct Cli {
    /// Directory holding the todo files and their Git repository
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory for the git identity config and SSH keys
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, default_value = "5001")]
    port: u16,

    /// Verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var_os("GITODO_DATA_DIR").map(PathBuf::from))
        .or_else(|| dirs::data_local_dir().map(|p| p.join("gitodo").join("repo")))
        .context("could not determine a data directory")?;
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var_os("GITODO_CONFIG_DIR").map(PathBuf::from))
        .or_else(GitBackend::default_config_dir)
        .context("could not determine a config directory")?;

    let backend = Arc::new(GitBackend::new(data_dir, config_dir));
    backend.init().context("failed to initialize Git backend")?;

    server::serve(backend, cli.port)
        .await
        .context("server error")?;
    Ok(())
}
