use std::time::Duration;
use typed_builder::TypedBuilder;

/// Page size used when a list request does not ask for a positive limit.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Tunables of the [`ShortenerService`](crate::ShortenerService).
#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerConfig {
    /// Prefix of every short URL handed out, e.g. `https://sn.ip`.
    #[builder(default = "http://localhost:8080".to_string(), setter(into))]
    pub base_url: String,

    /// Generate-and-persist attempts before falling back to a dedup re-read.
    #[builder(default = 5)]
    pub max_create_attempts: usize,

    /// Advisory store lookups per attempt to skip codes that are already taken.
    /// Zero disables probing.
    #[builder(default = 3)]
    pub uniqueness_probes: usize,

    #[builder(default = Duration::from_secs(5 * 60))]
    pub response_ttl: Duration,

    /// Entity cache TTL for entities without an expiry.
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    pub default_entity_ttl: Duration,

    /// Upper bound on one detached click-accounting job.
    #[builder(default = Duration::from_secs(5))]
    pub click_timeout: Duration,

    #[builder(default = 4)]
    pub click_workers: usize,

    #[builder(default = 1024)]
    pub click_queue_capacity: usize,

    /// How long a redirect waits for room in a full click queue before the
    /// click is dropped.
    #[builder(default = Duration::from_millis(50))]
    pub click_enqueue_timeout: Duration,

    #[builder(default = 100)]
    pub list_max_limit: usize,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ShortenerConfig {
    /// Clamps a requested page into `(limit, offset)` the repository accepts.
    pub fn page(&self, limit: i64, offset: i64) -> (usize, usize) {
        let limit = match usize::try_from(limit) {
            Ok(0) | Err(_) => DEFAULT_LIST_LIMIT,
            Ok(limit) => limit.min(self.list_max_limit),
        };
        let offset = usize::try_from(offset).unwrap_or(0);
        (limit, offset)
    }
}
