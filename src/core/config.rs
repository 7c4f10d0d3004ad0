use std::time::Duration;

pub const TCP_DEFAULT_PORT: u16 = 6001;
pub const DISCOVERY_DEFAULT_PORT: u16 = 37020;

/// Poll granularity for the accept and discovery-listen loops. Each loop
/// re-checks the shutdown flag at most this long after it is raised.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct Config {
    pub tcp_port: u16,
    pub discovery_port: u16,
    pub display_name: String,
    pub announce_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_port: TCP_DEFAULT_PORT,
            discovery_port: DISCOVERY_DEFAULT_PORT,
            display_name: "swarmlink-node".to_string(),
            announce_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(8),
        }
    }
}
