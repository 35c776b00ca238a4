//! The channel list as a reactive, cached value.
//!
//! `ChannelListProvider` fetches `<base>/channels` at most once per cache
//! slot and hands out the result as a plain `Vec<Channel>`. While the request
//! is in flight, and after it fails, readers see an empty list. Whether
//! `load()` also reports the failure is decided by `FailurePolicy`.

use crate::api::{ApiClient, Channel};
use crate::error::{Error, Result};
use crate::query::{CacheEntry, FetchState, QueryCache, Slot};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const CHANNELS_CACHE_KEY: &str = "channels";

pub type ChannelCache = QueryCache<Vec<Channel>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Every failure reads as "no channels".
    Empty,
    /// `load()` and `refetch()` return the error.
    Surface,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Empty
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
    pub failure_policy: FailurePolicy,
}

/// Host events that may ask for fresh data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefetchTrigger {
    WindowFocus,
    Reconnect,
}

#[derive(Clone)]
pub struct ChannelListProvider {
    api: Arc<ApiClient>,
    cache: Arc<ChannelCache>,
    options: QueryOptions,
}

impl ChannelListProvider {
    pub fn new(api: ApiClient, cache: Arc<ChannelCache>, options: QueryOptions) -> ChannelListProvider {
        ChannelListProvider {
            api: Arc::new(api),
            cache,
            options,
        }
    }

    /// Provider with its own cache and no request timeout.
    pub fn from_base_url(api_base_url: &str, options: QueryOptions) -> Result<ChannelListProvider> {
        let api = ApiClient::new(api_base_url, None)?;
        Ok(Self::new(api, Arc::new(QueryCache::new()), options))
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    /// Current channel list, never blocks. Starts the fetch on a cache miss.
    pub fn channels(&self) -> Vec<Channel> {
        let entry = self.cache.entry(CHANNELS_CACHE_KEY);
        self.start_fetch(&entry);
        collapse(&entry.state())
    }

    /// Waits for the fetch to settle.
    pub async fn load(&self) -> Result<Vec<Channel>> {
        let entry = self.cache.entry(CHANNELS_CACHE_KEY);
        self.start_fetch(&entry);

        let slot = entry.wait_settled().await;
        self.resolve(slot.state)
    }

    pub fn subscribe(&self) -> ChannelWatch {
        let entry = self.cache.entry(CHANNELS_CACHE_KEY);
        let watch = ChannelWatch::new(entry.subscribe());
        self.start_fetch(&entry);
        watch
    }

    /// Raw slot state, for callers that need to tell an empty list apart
    /// from a failed fetch. Doesn't start a fetch.
    pub fn state(&self) -> FetchState<Vec<Channel>> {
        self.cache
            .get(CHANNELS_CACHE_KEY)
            .map(|entry| entry.state())
            .unwrap_or(FetchState::Pending)
    }

    pub fn invalidate(&self) -> bool {
        self.cache.invalidate(CHANNELS_CACHE_KEY)
    }

    /// Invalidates, then waits for a fetch that started after the
    /// invalidation. A request already in flight doesn't count.
    pub async fn refetch(&self) -> Result<Vec<Channel>> {
        let entry = self.cache.entry(CHANNELS_CACHE_KEY);
        let generation = entry.mark_stale();
        self.start_fetch(&entry);

        loop {
            let slot = entry.wait_settled().await;
            if slot.settled_generation >= generation {
                return self.resolve(slot.state);
            }
            // The older request settled first, the slot is still stale
            if !self.start_fetch(&entry) && !entry.snapshot().is_fetching {
                return self.resolve(slot.state);
            }
        }
    }

    /// Returns whether the trigger started a request.
    pub fn notify(&self, trigger: RefetchTrigger) -> bool {
        let enabled = match trigger {
            RefetchTrigger::WindowFocus => self.options.refetch_on_window_focus,
            RefetchTrigger::Reconnect => self.options.refetch_on_reconnect,
        };
        if !enabled {
            debug!(?trigger, "Refetch trigger disabled, ignoring");
            return false;
        }

        // Nothing settled yet means the initial fetch is still the one to wait for
        let entry = match self.cache.get(CHANNELS_CACHE_KEY) {
            Some(entry) if !entry.state().is_pending() => entry,
            _ => return false,
        };
        entry.mark_stale();
        self.start_fetch(&entry)
    }

    fn start_fetch(&self, entry: &Arc<CacheEntry<Vec<Channel>>>) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime, can't fetch the channel list");
                return false;
            }
        };
        let claim = match entry.try_claim() {
            Some(claim) => claim,
            None => return false,
        };

        // If the task is dropped before settling (runtime shutdown), the
        // claim releases the slot on its own
        let api = self.api.clone();
        runtime.spawn(async move {
            let state = match api.fetch_channels().await {
                Ok(channels) => {
                    debug!(count = channels.len(), "Fetched channel list");
                    FetchState::Ready(channels)
                }
                Err(err) => {
                    warn!("Error while fetching channel list: {}", err);
                    FetchState::Failed(err.to_string())
                }
            };
            claim.settle(state);
        });
        true
    }

    fn resolve(&self, state: FetchState<Vec<Channel>>) -> Result<Vec<Channel>> {
        match state {
            FetchState::Ready(channels) => Ok(channels),
            FetchState::Failed(err) => match self.options.failure_policy {
                FailurePolicy::Empty => Ok(Vec::new()),
                FailurePolicy::Surface => Err(Error::Fetch(err)),
            },
            FetchState::Pending => Ok(Vec::new()),
        }
    }
}

/// Fetches the channel list once with default options.
pub async fn get_channels(api_base_url: &str) -> Result<Vec<Channel>> {
    ChannelListProvider::from_base_url(api_base_url, QueryOptions::default())?
        .load()
        .await
}

fn collapse(state: &FetchState<Vec<Channel>>) -> Vec<Channel> {
    state.ready().cloned().unwrap_or_default()
}

/// Observer side of the channel slot.
pub struct ChannelWatch {
    rx: watch::Receiver<Slot<Vec<Channel>>>,
    last: FetchState<Vec<Channel>>,
}

impl ChannelWatch {
    fn new(rx: watch::Receiver<Slot<Vec<Channel>>>) -> ChannelWatch {
        let last = rx.borrow().state.clone();
        ChannelWatch { rx, last }
    }

    pub fn current(&self) -> Vec<Channel> {
        collapse(&self.rx.borrow().state)
    }

    pub fn state(&self) -> FetchState<Vec<Channel>> {
        self.rx.borrow().state.clone()
    }

    /// Waits until the cached value changes. Flag-only updates (a refetch
    /// starting, the slot going stale) don't count. Returns `None` once the
    /// cache slot is gone.
    pub async fn changed(&mut self) -> Option<Vec<Channel>> {
        loop {
            self.rx.changed().await.ok()?;
            let next = {
                let slot = self.rx.borrow_and_update();
                if slot.state != self.last {
                    Some(slot.state.clone())
                } else {
                    None
                }
            };
            if let Some(state) = next {
                let channels = collapse(&state);
                self.last = state;
                return Some(channels);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<Channel>> {
        stream::unfold(self, |mut watch| async move {
            let channels = watch.changed().await?;
            Some((channels, watch))
        })
    }
}
