mod app;
mod config;
mod conversation;
mod gemini;
mod media;
mod store;
mod tui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use config::Config;
use tui::Tui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal chat client for the Gemini API", long_about = None)]
struct Cli {
    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,
    #[arg(short, long, help = "Open an existing conversation by id")]
    conversation: Option<String>,
    #[arg(long, help = "Sqlite database URL, e.g. sqlite:gemchat.db")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }

    let debug_enabled = cli.debug || config.debug.unwrap_or(false);
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug_enabled { "debug" } else { "info" }),
    )
    .init();

    log::info!("gemchat starting...");
    log::debug!("CLI args: {:?}", cli);

    // Without a key there is nothing this client can do.
    let api_key = config
        .api_key
        .clone()
        .context("GEMINI_API_KEY is not set; export it or put apiKey in .gemchat.json")?;

    let mut app = App::new(&config, api_key).await?;
    if let Some(id) = cli.conversation.as_deref() {
        app.load_conversation(Some(id)).await;
    }

    let mut tui = Tui::new()?;
    tui.run_loop(&mut app).await?;

    log::info!("gemchat finished.");
    Ok(())
}
