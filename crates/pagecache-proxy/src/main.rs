//! pagecache CLI entrypoint.

use clap::Parser;
use pagecache_proxy::commands::{self, Commands};
use pagecache_proxy::{ProxyConfig, logging, serve};

#[derive(Parser)]
#[command(name = "pagecache")]
#[command(author, version, about = "Caching reverse proxy with stale-while-revalidate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_format } => {
            let config = ProxyConfig::load(config.as_deref())?;
            logging::init_logging(log_format.unwrap_or(config.log_format))?;
            serve(config).await?;
        }
        Commands::Check { config } => print!("{}", commands::check(config.as_deref())?),
        Commands::Key {
            path_and_query,
            namespace,
        } => print!("{}", commands::key(&path_and_query, &namespace)?),
    }

    Ok(())
}
