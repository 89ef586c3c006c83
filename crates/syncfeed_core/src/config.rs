//! Engine configuration.

/// Tuning for the change-log engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    /// Maximum items read per catch-up or list page.
    pub scan_batch_size: usize,

    /// Records and log rows handled per write section during a rebuild.
    pub reindex_batch_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: 500,
            reindex_batch_size: 200,
        }
    }
}

impl CoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan batch size (minimum 1).
    #[must_use]
    pub const fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the reindex batch size (minimum 1).
    #[must_use]
    pub const fn with_reindex_batch_size(mut self, size: usize) -> Self {
        self.reindex_batch_size = if size == 0 { 1 } else { size };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.scan_batch_size, 500);
        assert_eq!(config.reindex_batch_size, 200);
    }

    #[test]
    fn builder_pattern() {
        let config = CoreConfig::new()
            .with_scan_batch_size(10)
            .with_reindex_batch_size(0);
        assert_eq!(config.scan_batch_size, 10);
        assert_eq!(config.reindex_batch_size, 1);
    }
}
