//! Test data builders for creating test objects

use std::path::Path;
use vibdaq_rs::config::DaqConfig;

/// Builder for session configurations pointing at a temporary directory
pub struct ConfigBuilder {
    config: DaqConfig,
}

impl ConfigBuilder {
    pub fn new(output_dir: &Path) -> Self {
        let mut config = DaqConfig::default();
        config.storage.output_dir = output_dir.to_path_buf();
        config.device.sample_rate_hz = 100;
        config.storage.segment_seconds = 1;
        // Scheduled flushes stay out of the way unless a test asks for them
        config.upload.interval_seconds = 3600;
        Self { config }
    }

    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.config.device.sample_rate_hz = hz;
        self
    }

    pub fn segment_seconds(mut self, seconds: u64) -> Self {
        self.config.storage.segment_seconds = seconds;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.device.queue_capacity = capacity;
        self
    }

    pub fn upload_interval(mut self, seconds: u64) -> Self {
        self.config.upload.interval_seconds = seconds;
        self
    }

    pub fn upload_enabled(mut self) -> Self {
        self.config.upload.enabled = true;
        self
    }

    pub fn build(self) -> DaqConfig {
        self.config
    }
}

/// Raw FIFO words for `triplets` samples: X = 3n, Y = 3n + 1, Z = 3n + 2
pub fn counter_words(triplets: usize) -> Vec<u16> {
    (0..triplets * 3).map(|i| i as u16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new(Path::new("/tmp/out"))
            .sample_rate(250)
            .upload_enabled()
            .build();

        assert_eq!(config.device.sample_rate_hz, 250);
        assert!(config.upload.enabled);
        assert!(config.validate().is_ok());
    }
}
