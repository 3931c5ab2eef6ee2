//! Store configuration.

/// Configuration for opening a durable object store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the backing file (and parent directories) if missing.
    pub create_if_missing: bool,

    /// Whether to fsync the backing file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to drop every ephemeral key space right after opening.
    pub clear_ephemeral_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            clear_ephemeral_on_open: false,
        }
    }
}

impl StoreConfig {
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

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether ephemeral key spaces are cleared on open.
    #[must_use]
    pub const fn clear_ephemeral_on_open(mut self, value: bool) -> Self {
        self.clear_ephemeral_on_open = value;
        self
    }
}
