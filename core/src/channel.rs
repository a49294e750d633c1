//! Channel configuration for realtime collection

/// Channel buffer configuration for collector -> orchestrator communication
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Parsed sample channel buffer size
    pub sample_buffer: usize,
    /// Error line channel buffer size
    pub error_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sample_buffer: 1_024,
            error_buffer: 256,
        }
    }
}

impl ChannelConfig {
    /// Set the sample buffer size
    pub fn with_sample_buffer(mut self, size: usize) -> Self {
        self.sample_buffer = size;
        self
    }

    /// Set the error buffer size
    pub fn with_error_buffer(mut self, size: usize) -> Self {
        self.error_buffer = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.sample_buffer, 1_024);
        assert_eq!(config.error_buffer, 256);
    }

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::default()
            .with_sample_buffer(16)
            .with_error_buffer(4);
        assert_eq!(config.sample_buffer, 16);
        assert_eq!(config.error_buffer, 4);
    }
}
