use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("No API base URL configured, set api_base_url or CHANNEL_LIST_API_URL")]
    MissingBaseUrl,

    #[error("Could not build the HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("No channel {0}")]
    ChannelNotFound(String),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Invalid response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Channel list fetch failed: {0}")]
    Fetch(String),

    #[error("Settings file not found: {path}")]
    SettingsNotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error parsing settings file, are you missing some settings? {0}")]
    Config(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
