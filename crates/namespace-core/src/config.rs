use crate::transport::RoomOptions;

/// Port the signaling relay listens on by default.
pub const DEFAULT_SIGNALING_PORT: u16 = 4444;
pub const DEFAULT_ROOM: &str = "lan-room";
pub const DEFAULT_MAX_CONNS: usize = 20;
pub const DEFAULT_INITIAL_FILE: &str = "Untitled.txt";

/// Settings for one workspace session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Room every collaborating peer joins.
    pub room: String,
    /// Relay URLs handed to the peer transport.
    pub signaling: Vec<String>,
    pub max_conns: usize,
    /// Name of the file synthesized when the tree starts out empty.
    pub initial_file_name: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            signaling: signaling_endpoints("localhost", false),
            max_conns: DEFAULT_MAX_CONNS,
            initial_file_name: DEFAULT_INITIAL_FILE.to_string(),
        }
    }
}

impl WorkspaceConfig {
    /// Config for a page served from `host`, signaling only on that host.
    pub fn for_host(host: &str, secure: bool) -> Self {
        Self {
            signaling: signaling_endpoints(host, secure),
            ..Self::default()
        }
    }

    /// Load overrides from environment variables.
    ///
    /// Optional environment variables:
    /// - `WORKSPACE_ROOM`: room name
    /// - `WORKSPACE_SIGNALING`: comma-separated relay URLs
    /// - `WORKSPACE_MAX_CONNS`: peer link limit
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(room) = std::env::var("WORKSPACE_ROOM") {
            let room = room.trim();
            if room.is_empty() {
                return Err(ConfigError::EmptyRoom);
            }
            config.room = room.to_string();
        }
        if let Ok(list) = std::env::var("WORKSPACE_SIGNALING") {
            config.signaling = parse_signaling(&list)?;
        }
        if let Ok(raw) = std::env::var("WORKSPACE_MAX_CONNS") {
            config.max_conns = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidMaxConns(raw.clone()))?;
        }

        Ok(config)
    }

    pub fn room_options(&self) -> RoomOptions {
        RoomOptions {
            room: self.room.clone(),
            signaling: self.signaling.clone(),
            max_conns: self.max_conns,
        }
    }
}

/// LAN signaling on the serving host only, no public fallback.
///
/// Pages served over https need `wss`.
pub fn signaling_endpoints(host: &str, secure: bool) -> Vec<String> {
    let scheme = if secure { "wss" } else { "ws" };
    vec![format!("{}://{}:{}", scheme, host, DEFAULT_SIGNALING_PORT)]
}

fn parse_signaling(list: &str) -> Result<Vec<String>, ConfigError> {
    let urls: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if urls.is_empty() {
        return Err(ConfigError::NoSignaling);
    }
    if let Some(bad) = urls
        .iter()
        .find(|u| !(u.starts_with("ws://") || u.starts_with("wss://")))
    {
        return Err(ConfigError::InvalidSignalingUrl(bad.clone()));
    }
    Ok(urls)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WORKSPACE_ROOM must not be empty")]
    EmptyRoom,
    #[error("WORKSPACE_SIGNALING lists no relay")]
    NoSignaling,
    #[error("Signaling URL must use ws:// or wss://: {0}")]
    InvalidSignalingUrl(String),
    #[error("WORKSPACE_MAX_CONNS is not a number: {0}")]
    InvalidMaxConns(String),
}
