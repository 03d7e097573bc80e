use std::time::Duration;

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server listen port.
    pub port: u16,
    /// Server bind host.
    pub host: String,
    /// Upper bound for handing one frame to one client, in milliseconds.
    pub send_timeout_ms: u64,
    /// Capacity of each client's outbound frame buffer.
    pub client_buffer: usize,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();
        AppConfig {
            port: env_parse("PORT").unwrap_or(defaults.port),
            host: std::env::var("HOST").unwrap_or(defaults.host),
            send_timeout_ms: env_parse("RELAY_SEND_TIMEOUT_MS").unwrap_or(defaults.send_timeout_ms),
            client_buffer: env_parse::<usize>("RELAY_CLIENT_BUFFER")
                .unwrap_or(defaults.client_buffer)
                .max(1),
        }
    }

    /// Socket address string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            port: 8000,
            host: "0.0.0.0".to_string(),
            send_timeout_ms: 2000,
            client_buffer: 64,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
