/// Application name
pub const APP_NAME: &str = "Parley";

/// Name of the text channel every server is created with. It cannot be deleted.
pub const GENERAL_CHANNEL_NAME: &str = "general";

/// Name of the voice channel every server is created with.
pub const GENERAL_VOICE_CHANNEL_NAME: &str = "General";

/// Name of the default role every member is bound to on join.
pub const DEFAULT_ROLE_NAME: &str = "@everyone";

/// Name of the category holding the default channels.
pub const DEFAULT_CATEGORY_NAME: &str = "TEXT CHANNELS";

/// Maximum length (in chars) of server, channel and category names
pub const MAX_NAME_LEN: usize = 100;

/// Maximum length (in chars) of a message body
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Default page size for message history reads
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound for message history page size
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Lifetime of a media room access token in seconds (10 minutes)
pub const MEDIA_TOKEN_TTL_SECS: i64 = 600;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default per-subscriber event queue depth on the bus
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 1024;
