//! Pipeline settings derived from the gateway configuration

use std::time::Duration;

use qs_core::Config;

/// Bounds applied to one ingestion cycle
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper bound on messages fetched, and on items classified, per cycle
    pub batch_limit: usize,
    /// Timeout for one mailbox fetch
    pub fetch_timeout: Duration,
    /// Timeout for one extraction call
    pub extract_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            fetch_timeout: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_limit: config.monitor.max_messages_per_cycle.max(1),
            fetch_timeout: Duration::from_secs(config.monitor.fetch_timeout_secs),
            // the HTTP client enforces timeout_secs per request; leave it room to fire first
            extract_timeout: Duration::from_secs(config.extraction.timeout_secs + 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.monitor.max_messages_per_cycle = 0;
        config.monitor.fetch_timeout_secs = 12;
        config.extraction.timeout_secs = 20;

        let settings = PipelineSettings::from_config(&config);
        assert_eq!(settings.batch_limit, 1);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(12));
        assert_eq!(settings.extract_timeout, Duration::from_secs(25));
    }
}
