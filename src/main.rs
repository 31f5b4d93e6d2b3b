use clap::Parser;

use tether::cli::{self, Cli, Command};
use tether::config::Settings;
use tether::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load_from_env()?;
    init_logging(LogConfig::from_settings(&settings.log))?;

    match cli.command {
        Command::Serve { host, port } => cli::handle_serve(&settings, host, port).await,

        Command::Token {
            client_id,
            ttl_secs,
        } => cli::handle_token(&settings, &client_id, ttl_secs),

        Command::Net { peer } => cli::handle_net(&settings, &peer).await,

        Command::Call {
            server,
            token,
            tool,
            params,
            direct,
        } => cli::handle_call(&settings, &server, token, &tool, &params, direct).await,
    }
}
