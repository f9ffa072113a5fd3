use std::time::Duration;

use tracing::{debug, info};

/// Default retention of a transfer record: 30 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Recorded as the public URL when objects are not made public.
pub const PRIVATE_URL_PLACEHOLDER: &str = "not-public";

/// Tuning knobs for one [`Migrator`](crate::migrate::Migrator).
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Retention of the transfer record written after each successful copy.
    pub ttl: Duration,
    /// Objects copied at once. `1` processes strictly one object at a time.
    pub concurrency: usize,
    /// Copy attempts per object, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub retry_base_delay: Duration,
    /// How long the destination may take to confirm a finished write.
    pub completion_timeout: Duration,
    pub make_public: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            concurrency: 1,
            max_attempts: 1,
            retry_base_delay: Duration::from_secs(2),
            completion_timeout: Duration::from_secs(300),
            make_public: false,
        }
    }
}

impl MigrateOptions {
    pub fn trace_loaded(&self) {
        info!(
            ttl_secs = self.ttl.as_secs(),
            concurrency = self.concurrency,
            max_attempts = self.max_attempts,
            make_public = self.make_public,
            "Loaded MigrateOptions"
        );
        debug!(?self, "MigrateOptions loaded (full debug)");
    }
}
