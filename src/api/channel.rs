use crate::error::{Error, Result};
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A channel record as served by the backend. Fields we don't know about are
/// kept in `extra` so the record round-trips unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Channel {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Channel {
    pub fn new(user_id: &str, name: &str) -> Channel {
        Channel {
            user_id: user_id.to_owned(),
            name: name.to_owned(),
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ChannelsList {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

// The backend addresses a channel either by login name or by user id
pub fn find_by_name<'a>(channels: &'a [Channel], name: &str) -> Option<&'a Channel> {
    channels.iter().find(|c| c.name == name)
}

pub fn find_by_user_id<'a>(channels: &'a [Channel], user_id: &str) -> Option<&'a Channel> {
    channels.iter().find(|c| c.user_id == user_id)
}

/// Narrows `channels` to the one picked by `name` (checked first) or
/// `user_id`. With neither given the list comes back unchanged.
pub fn select(channels: Vec<Channel>, name: Option<&str>, user_id: Option<&str>) -> Result<Vec<Channel>> {
    let found = match (name, user_id) {
        (Some(name), _) => find_by_name(&channels, name)
            .ok_or_else(|| Error::ChannelNotFound(format!("named {}", name)))?,
        (None, Some(user_id)) => find_by_user_id(&channels, user_id)
            .ok_or_else(|| Error::ChannelNotFound(format!("with user id {}", user_id)))?,
        (None, None) => return Ok(channels),
    };
    Ok(vec![found.clone()])
}
