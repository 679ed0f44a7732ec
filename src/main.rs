//! Bot forwarding new tweets from an X search to a Discord webhook
//! One invocation is one pipeline pass, an external scheduler (cron or
//! Cloud Scheduler hitting the serve endpoint) provides the interval
use anyhow::Result;
use env_logger::Env;
use log::{debug, error, info};
use structopt::StructOpt;

mod cli;
mod config;
mod cursor_store;
mod discord_client;
mod fwd_app;
mod server;
mod x_client;
mod x_object;

use cli::{Action, CommandLineArgs};
use config::Config;
use cursor_store::{CursorStore, GcpSecretStore};
use discord_client::DiscordWebhook;
use x_client::XSearchClient;

/// Entrypoint Function
///
/// It will use the following environment variables
/// * `XFWD_LOG_LEVEL` Log level setting e.g. `XFWD_LOG_LEVEL=xfwd=debug`
/// * `XFWD_BEARER_TOKEN` Bearer Token for the X API
/// * `XFWD_WEBHOOK_URL` Discord webhook URL
/// * `XFWD_QUERY` Search query
/// * `XFWD_STATE_FILE` / `XFWD_CURSOR_SECRET` Cursor storage locations
/// * `GOOGLE_CLOUD_PROJECT` / `K_SERVICE` / `PORT` Hosted environment facts
fn main() -> Result<()> {
    let env = Env::default().filter_or("XFWD_LOG_LEVEL", "info");
    env_logger::init_from_env(env);

    if dotenvy::dotenv().is_ok() {
        debug!("Loaded the .env file");
    }

    let CommandLineArgs { action, state_file } = CommandLineArgs::from_args();

    let mut config = Config::from_env().map_err(|e| {
        error!("{:#}", e);
        e
    })?;
    if let Some(path) = state_file {
        config.state_file = path;
    }
    info!("Search query: {}", config.query);

    let x_client = XSearchClient::new(&config)?;
    let webhook = DiscordWebhook::new(&config)?;

    // the remote cursor tier only makes sense hosted with a project identity
    let remote = if config.hosted {
        config
            .project_id
            .as_ref()
            .map(|project| GcpSecretStore::new(project.clone()))
    } else {
        None
    };
    let cursor_store = CursorStore::new(
        remote,
        config.cursor_secret.clone(),
        config.state_file.clone(),
    );

    match action {
        Action::Run => fwd_app::fetch_and_forward(&x_client, &webhook, &cursor_store),
        Action::Serve { port } => server::run_server(
            port.unwrap_or(config.port),
            &x_client,
            &webhook,
            &cursor_store,
        ),
    }
}
