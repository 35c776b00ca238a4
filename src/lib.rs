//! Fetches the channel list from a logs API and keeps it as a cached,
//! observable value.

pub mod api;
pub mod error;
pub mod provider;
pub mod query;
pub mod settings;

pub use api::{ApiClient, Channel, ChannelsList};
pub use error::{Error, Result};
pub use provider::{
    get_channels, ChannelListProvider, ChannelWatch, FailurePolicy, QueryOptions, RefetchTrigger,
    CHANNELS_CACHE_KEY,
};
pub use query::{FetchState, QueryCache};
pub use settings::Settings;
