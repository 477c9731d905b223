/// Ed25519 secret seed size in bytes
pub const SIGNING_SEED_SIZE: usize = 32;

/// Maximum length of a chat message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Maximum length of a conversation subject, in characters
pub const MAX_SUBJECT_CHARS: usize = 200;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Websocket path of the chat hub
pub const CHAT_HUB_PATH: &str = "/hubs/chat";

/// Websocket path of the staff statistics hub
pub const STATS_HUB_PATH: &str = "/hubs/stats";

/// Query parameter carrying the bearer token during the websocket handshake
pub const ACCESS_TOKEN_QUERY_PARAM: &str = "access_token";

/// Settings key under which the maintenance window is persisted
pub const MAINTENANCE_SETTING_KEY: &str = "maintenance";
