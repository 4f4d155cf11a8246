//! Grounding context for classification.
//!
//! Distinct real values per contact column, sampled from the store and kept
//! for a bounded time so classification does not hit the store on every run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::campaign::{ColumnSamples, FilterField};
use crate::store::Database;

/// Values shown per column in a prompt.
const PROMPT_PREVIEW_VALUES: usize = 40;

/// The whole sample set lives under one key.
const SAMPLES_KEY: &str = "contact_columns";

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct Cached {
    samples: ColumnSamples,
    /// Stamped from the injected clock; freshness is judged against it.
    fetched_at: Instant,
}

/// TTL cache of column samples.
pub struct GroundingCache {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    sample_limit: usize,
    cache: Cache<&'static str, Arc<Cached>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl GroundingCache {
    pub fn new(db: Arc<dyn Database>, ttl: Duration, sample_limit: usize) -> Self {
        Self::with_clock(db, ttl, sample_limit, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Arc<dyn Database>,
        ttl: Duration,
        sample_limit: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();

        Self {
            db,
            clock,
            ttl,
            sample_limit,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current samples, refreshing from the store once the TTL has lapsed.
    ///
    /// A column that cannot be sampled is recorded as empty rather than
    /// failing the whole refresh. Concurrent misses share one fetch.
    pub async fn samples(&self) -> ColumnSamples {
        if let Some(cached) = self.cache.get(&SAMPLES_KEY).await {
            if self.is_fresh(&cached) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Using cached grounding samples");
                return cached.samples.clone();
            }
            self.cache.invalidate(&SAMPLES_KEY).await;
        }

        let cached = self
            .cache
            .get_with(SAMPLES_KEY, async {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Arc::new(self.fetch().await)
            })
            .await;
        cached.samples.clone()
    }

    fn is_fresh(&self, cached: &Cached) -> bool {
        self.clock.now().saturating_duration_since(cached.fetched_at) < self.ttl
    }

    async fn fetch(&self) -> Cached {
        info!("Fetching fresh grounding samples from contact store");
        let mut samples = ColumnSamples::new();
        for field in FilterField::GROUNDED {
            let values = match self.db.sample_distinct(field, self.sample_limit).await {
                Ok(values) => values,
                Err(e) => {
                    warn!(column = field.column(), error = %e, "Could not sample column");
                    Vec::new()
                }
            };
            samples.insert(field, values);
        }

        Cached {
            samples,
            fetched_at: self.clock.now(),
        }
    }

    /// Drop the cached samples so the next read refetches.
    pub async fn invalidate(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

/// Render samples as one line per grounded column for a prompt.
pub fn format_samples(samples: &ColumnSamples) -> String {
    FilterField::GROUNDED
        .iter()
        .map(|field| {
            let values = samples.get(field).map(Vec::as_slice).unwrap_or_default();
            if values.is_empty() {
                return format!("  {}: [no data]", field.column());
            }
            let mut preview = values
                .iter()
                .take(PROMPT_PREVIEW_VALUES)
                .map(|v| format!("\"{v}\""))
                .collect::<Vec<_>>()
                .join(", ");
            if values.len() > PROMPT_PREVIEW_VALUES {
                preview.push_str(&format!(" … (+{} more)", values.len() - PROMPT_PREVIEW_VALUES));
            }
            format!("  {}: [{}]", field.column(), preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::campaign::Contact;
    use crate::store::LibSqlBackend;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    async fn seeded() -> Arc<LibSqlBackend> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_contact(&Contact::new("a@x.io").with_role("CTO").with_location("Berlin"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn serves_cached_samples_until_ttl() {
        let db = seeded().await;
        let clock = Arc::new(ManualClock::new());
        let cache = GroundingCache::with_clock(db.clone(), Duration::from_secs(3600), 80, clock.clone());

        let first = cache.samples().await;
        assert_eq!(first[&FilterField::Role], vec!["CTO".to_string()]);

        db.upsert_contact(&Contact::new("b@x.io").with_role("VP Sales")).await.unwrap();
        clock.advance(Duration::from_secs(3599));
        let second = cache.samples().await;
        assert_eq!(second[&FilterField::Role].len(), 1);

        clock.advance(Duration::from_secs(2));
        let third = cache.samples().await;
        assert_eq!(third[&FilterField::Role].len(), 2);
        assert_eq!(cache.stats(), (1, 2));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let db = seeded().await;
        let cache = GroundingCache::with_clock(db, Duration::from_secs(3600), 80, Arc::new(ManualClock::new()));

        let (a, b) = tokio::join!(cache.samples(), cache.samples());
        assert_eq!(a, b);
        assert_eq!(cache.stats().1, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let db = seeded().await;
        let cache = GroundingCache::with_clock(
            db.clone(),
            Duration::from_secs(3600),
            80,
            Arc::new(ManualClock::new()),
        );
        cache.samples().await;
        db.upsert_contact(&Contact::new("b@x.io").with_location("Paris")).await.unwrap();
        cache.invalidate().await;
        let samples = cache.samples().await;
        assert_eq!(samples[&FilterField::Location].len(), 2);
    }

    #[test]
    fn format_truncates_and_marks_empty() {
        let mut samples = ColumnSamples::new();
        samples.insert(FilterField::Role, (0..45).map(|i| format!("r{i}")).collect());
        samples.insert(FilterField::Location, vec!["Berlin".into()]);

        let text = format_samples(&samples);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("  role: [\"r0\""));
        assert!(lines[0].ends_with("… (+5 more)]"));
        assert_eq!(lines[1], "  location: [\"Berlin\"]");
        assert_eq!(lines[2], "  category: [no data]");
        assert_eq!(lines[3], "  company: [no data]");
    }
}
