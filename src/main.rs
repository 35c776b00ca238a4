use channel_list::api::select;
use channel_list::{ApiClient, ChannelListProvider, ChannelsList, QueryCache, Settings};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "channel-list")]
#[command(about = "List the channels known to a logs API")]
struct Cli {
    /// API base URL, overrides the settings file
    #[arg(long)]
    api_url: Option<String>,

    /// Settings file (default: ~/.config/channel_list.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the raw JSON envelope
    #[arg(long)]
    json: bool,

    /// Only show the channel with this name
    #[arg(long, conflicts_with = "user_id")]
    name: Option<String>,

    /// Only show the channel with this user id
    #[arg(long)]
    user_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        settings.api_base_url = Some(url);
    }

    let api = ApiClient::new(settings.api_base_url()?, settings.request_timeout())?;
    info!("Fetching channels from {}", api.endpoint("channels"));
    let provider = ChannelListProvider::new(api, Arc::new(QueryCache::new()), settings.query_options());
    let channels = provider.load().await?;

    let selected = select(channels, cli.name.as_deref(), cli.user_id.as_deref())?;
    info!("{} channel(s)", selected.len());

    if cli.json {
        let envelope = ChannelsList { channels: selected };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        for channel in &selected {
            println!("{}\t{}", channel.name, channel.user_id);
        }
    }

    Ok(())
}
