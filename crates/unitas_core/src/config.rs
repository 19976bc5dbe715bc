//! Entity store configuration.

/// Configuration shared by the bundled entity stores.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the backing file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the journal after every committed batch.
    pub sync_on_commit: bool,

    /// Whether stored states carry version tokens. When off, every state
    /// reports the empty version and conflict checks are skipped.
    pub track_versions: bool,

    /// Maximum number of states accepted in one batch (0 = unlimited).
    pub max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            track_versions: true,
            max_batch_size: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the backing file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether versions are tracked.
    #[must_use]
    pub const fn track_versions(mut self, value: bool) -> Self {
        self.track_versions = value;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Returns true if a batch of `len` states is within the configured limit.
    #[must_use]
    pub const fn accepts_batch(&self, len: usize) -> bool {
        self.max_batch_size == 0 || len <= self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert!(config.track_versions);
        assert!(config.accepts_batch(10_000));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .track_versions(false)
            .max_batch_size(2);

        assert!(!config.create_if_missing);
        assert!(!config.track_versions);
        assert!(config.accepts_batch(2));
        assert!(!config.accepts_batch(3));
    }
}
