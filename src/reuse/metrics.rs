// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for token requests served by a
/// [`ReuseTokenSource`](super::ReuseTokenSource).
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	cache_hits: AtomicU64,
	cooldown_hits: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of exchanges started against the wrapped source.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of exchanges that produced a usable token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed exchanges.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of calls answered from the fresh cache or from another caller's
	/// refresh.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Returns the number of calls rejected with a replayed error during a cool-down.
	pub fn cooldown_hits(&self) -> u64 {
		self.cooldown_hits.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cooldown_hit(&self) {
		self.cooldown_hits.fetch_add(1, Ordering::Relaxed);
	}
}
