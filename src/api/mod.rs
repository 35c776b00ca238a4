mod channel;
mod http;

pub use self::channel::{find_by_name, find_by_user_id, select, Channel, ChannelsList};
pub use self::http::ApiClient;
