use crate::error::{Error, Result};
use crate::provider::{FailurePolicy, QueryOptions};
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

static CONFIG_FILE_RELPATH: &str = ".config/channel_list.json";
pub static API_URL_ENV: &str = "CHANNEL_LIST_API_URL";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: Option<String>,
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
    pub surface_errors: bool,
    pub request_timeout_secs: Option<u64>,
}

impl Settings {
    /// Reads `path`, or the default settings file when `path` is `None`. A
    /// missing default file just means default settings. The
    /// `CHANNEL_LIST_API_URL` environment variable wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => read_settings(path)?,
            None => match read_settings(&get_settings_file_path()?) {
                Err(Error::SettingsNotFound { .. }) => Settings::default(),
                other => other?,
            },
        };

        if let Ok(url) = env::var(API_URL_ENV) {
            if !url.is_empty() {
                settings.api_base_url = Some(url);
            }
        }
        Ok(settings)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(path) => path.to_owned(),
            None => get_settings_file_path()?,
        };

        let mut file = File::create(path)?;
        let encoded = serde_json::to_string_pretty(self)?;
        file.write_all(encoded.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn api_base_url(&self) -> Result<&str> {
        match self.api_base_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(Error::MissingBaseUrl),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            refetch_on_window_focus: self.refetch_on_window_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
            failure_policy: if self.surface_errors {
                FailurePolicy::Surface
            } else {
                FailurePolicy::Empty
            },
        }
    }
}

fn get_settings_file_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(Error::HomeNotFound)?;
    Ok(home.join(CONFIG_FILE_RELPATH))
}

fn read_settings(path: &Path) -> Result<Settings> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::SettingsNotFound {
                path: path.to_owned(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}
