//! Server configuration.

use std::time::Duration;

/// Configuration for the reference remote store.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest pull page the server returns.
    pub max_pull_page: usize,
    /// Largest push batch the server accepts.
    pub max_push_batch: usize,
    /// Simulated network latency added to every call.
    pub latency: Option<Duration>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_pull_page: 500,
            max_push_batch: 500,
            latency: None,
        }
    }

    /// Sets the maximum pull page size.
    pub fn with_max_pull_page(mut self, size: usize) -> Self {
        self.max_pull_page = size.max(1);
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size.max(1);
        self
    }

    /// Sets the simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_pull_page, 500);
        assert!(config.latency.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_pull_page(0)
            .with_max_push_batch(50)
            .with_latency(Duration::from_millis(20));

        assert_eq!(config.max_pull_page, 1);
        assert_eq!(config.max_push_batch, 50);
        assert_eq!(config.latency, Some(Duration::from_millis(20)));
    }
}
