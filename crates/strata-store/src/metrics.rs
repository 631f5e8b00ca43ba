//! Consistency-layer metrics.
//!
//! Provides metrics for cache behavior, optimistic-replace contention, and
//! invariant repairs. These metrics complement the structured logging
//! approach already in place.

use metrics::{counter, describe_counter};

use strata_core::DocumentKind;

/// Conditional-cache hit counter (entry present and not expired).
pub const CACHE_HITS: &str = "strata_cache_hits_total";

/// Conditional-cache miss counter.
pub const CACHE_MISSES: &str = "strata_cache_misses_total";

/// Conditional-cache revalidation counter (store reported "not modified").
pub const CACHE_REVALIDATIONS: &str = "strata_cache_revalidations_total";

/// Optimistic-replace retry counter (conditional write lost a race).
pub const REPLACE_RETRIES: &str = "strata_replace_retries_total";

/// Demotions applied while repairing duplicate-default partitions.
pub const DEFAULT_REPAIRS: &str = "strata_default_repairs_total";

/// Listener failures during post-write notification fan-out.
pub const NOTIFY_FAILURES: &str = "strata_notify_failures_total";

/// Registers all consistency-layer metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(CACHE_HITS, "Total conditional-cache hits");
    describe_counter!(CACHE_MISSES, "Total conditional-cache misses");
    describe_counter!(
        CACHE_REVALIDATIONS,
        "Total cache hits served without re-deserializing (not modified)"
    );
    describe_counter!(REPLACE_RETRIES, "Total optimistic replace retries");
    describe_counter!(
        DEFAULT_REPAIRS,
        "Total demotions applied while repairing duplicate defaults"
    );
    describe_counter!(NOTIFY_FAILURES, "Total notification listener failures");
}

/// Records a conditional-cache hit.
pub fn record_cache_hit(kind: DocumentKind) {
    counter!(CACHE_HITS, "kind" => kind.as_str()).increment(1);
}

/// Records a conditional-cache miss.
pub fn record_cache_miss(kind: DocumentKind) {
    counter!(CACHE_MISSES, "kind" => kind.as_str()).increment(1);
}

/// Records a cache hit served from the cached copy after a "not modified"
/// response.
pub fn record_cache_revalidation(kind: DocumentKind) {
    counter!(CACHE_REVALIDATIONS, "kind" => kind.as_str()).increment(1);
}

/// Records an optimistic replace retry.
pub fn record_replace_retry(kind: DocumentKind) {
    counter!(REPLACE_RETRIES, "kind" => kind.as_str()).increment(1);
}

/// Records demotions applied by a duplicate-default repair.
pub fn record_default_repair(kind: DocumentKind, demoted: usize) {
    counter!(DEFAULT_REPAIRS, "kind" => kind.as_str()).increment(demoted as u64);
}

/// Records a notification listener failure.
pub fn record_notify_failure() {
    counter!(NOTIFY_FAILURES).increment(1);
}
