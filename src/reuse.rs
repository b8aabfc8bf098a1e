//! Token caching with single-flight refresh coordination.
//!
//! [`ReuseTokenSource`] wraps any [`TokenSource`] and serves the cached token while it is fresh.
//! When a refresh is needed, exactly one caller (the leader) runs the exchange while the
//! remaining callers wait on the refresh guard and then receive the leader's recorded outcome.
//! Terminal failures arm a cool-down during which the same error is returned without contacting
//! the authorization server again.
//!
//! Persistence and notifications happen after the guard is released, so a slow
//! [`TokenStore`] or [`TokenCallback`] never holds up waiting callers. Saves are ordered by
//! refresh generation: a save that lands after a newer token was persisted is skipped, so the
//! store never falls back to a superseded token.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	callback::TokenCallback,
	error::RefreshError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	source::{TokenFuture, TokenSource},
	store::{StoreError, TokenStore},
	token::{self, Token},
};

/// Timing knobs for [`ReuseTokenSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReuseConfig {
	/// Tokens expiring within this window are refreshed instead of served.
	pub skew: Duration,
	/// How long a terminal refresh failure is replayed without a new exchange.
	pub cooldown: Duration,
}
impl ReuseConfig {
	/// Default refresh skew.
	pub const DEFAULT_SKEW: Duration = Duration::seconds(30);
	/// Default terminal-failure cool-down.
	pub const DEFAULT_COOLDOWN: Duration = Duration::seconds(60);

	/// Overrides the refresh skew; negative values are clamped to zero.
	pub fn with_skew(mut self, skew: Duration) -> Self {
		self.skew = if skew.is_negative() { Duration::ZERO } else { skew };

		self
	}

	/// Overrides the cool-down; zero or negative values disable it.
	pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
		self.cooldown = if cooldown.is_negative() { Duration::ZERO } else { cooldown };

		self
	}
}
impl Default for ReuseConfig {
	fn default() -> Self {
		Self { skew: Self::DEFAULT_SKEW, cooldown: Self::DEFAULT_COOLDOWN }
	}
}

/// Caching [`TokenSource`] decorator; clones share the same cache and refresh guard.
#[derive(Clone)]
pub struct ReuseTokenSource(Arc<ReuseInner>);
impl ReuseTokenSource {
	/// Starts building a reuse layer over `source`.
	pub fn builder(source: Arc<dyn TokenSource>) -> ReuseTokenSourceBuilder {
		ReuseTokenSourceBuilder::new(source)
	}

	/// Wraps `source`, seeding the cache with `initial` when present.
	pub fn new(source: Arc<dyn TokenSource>, initial: Option<Token>) -> Self {
		let mut builder = Self::builder(source);

		if let Some(token) = initial {
			builder = builder.token(token);
		}

		builder.build()
	}

	/// Returns a valid token, refreshing through the wrapped source when needed.
	///
	/// Callers that arrive while a refresh is in flight wait for it and receive its outcome;
	/// only one exchange runs per refresh cycle.
	pub async fn token(&self) -> Result<Token> {
		const KIND: FlowKind = FlowKind::Refresh;

		let inner = &self.0;
		let seen = {
			let state = inner.state.lock();
			let now = OffsetDateTime::now_utc();

			if let Some(token) =
				state.cached.as_ref().filter(|token| token.is_fresh_at(now, inner.config.skew))
			{
				inner.metrics.record_cache_hit();
				obs::record_flow_outcome(KIND, FlowOutcome::Reused);

				return Ok(token.clone());
			}
			if let Some(cooldown) = state.cooldown.as_ref().filter(|cooldown| now < cooldown.until)
			{
				inner.metrics.record_cooldown_hit();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);

				return Err(cooldown.error.clone().into());
			}

			state.generation
		};
		let span = FlowSpan::new(KIND, "reuse_token");

		span.instrument(self.refresh(seen)).await
	}

	/// Drops the cached token if it is still `rejected`.
	///
	/// Used after the resource server answered 401. Concurrent callers holding the same rejected
	/// token all funnel into one refresh: once a newer token is cached this is a no-op. Returns
	/// `true` when the cache was cleared.
	pub fn invalidate(&self, rejected: &Token) -> bool {
		let mut state = self.0.state.lock();

		if state.cached.as_ref().is_some_and(|cached| cached.same_access_token(rejected)) {
			state.cached = None;

			true
		} else {
			false
		}
	}

	/// Installs the persisted token from the attached store when the cache is empty.
	///
	/// Returns `true` when a stored token was adopted.
	pub async fn restore(&self) -> Result<bool, StoreError> {
		let Some(store) = self.store() else {
			return Ok(false);
		};
		let Some(token) = store.load().await?.filter(Token::is_usable) else {
			return Ok(false);
		};
		let mut state = self.0.state.lock();

		if state.cached.is_some() {
			return Ok(false);
		}

		state.cached = Some(token);

		Ok(true)
	}

	/// Returns the cached token without triggering a refresh.
	pub fn cached(&self) -> Option<Token> {
		self.0.state.lock().cached.clone()
	}

	/// Wrapped token source.
	pub fn source(&self) -> Arc<dyn TokenSource> {
		Arc::clone(&self.0.source)
	}

	/// Timing configuration.
	pub fn config(&self) -> ReuseConfig {
		self.0.config
	}

	/// Counters for this cache.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.0.metrics
	}

	/// Store receiving each refreshed token, if any.
	pub fn store(&self) -> Option<Arc<dyn TokenStore>> {
		self.0.store.read().clone()
	}

	/// Replaces the store used for subsequent refreshes.
	pub fn set_store(&self, store: Option<Arc<dyn TokenStore>>) {
		*self.0.store.write() = store;
	}

	/// Callback notified after each refresh, if any.
	pub fn callback(&self) -> Option<Arc<dyn TokenCallback>> {
		self.0.callback.read().clone()
	}

	/// Replaces the callback used for subsequent refreshes.
	pub fn set_callback(&self, callback: Option<Arc<dyn TokenCallback>>) {
		*self.0.callback.write() = callback;
	}

	/// Returns `true` when both handles share the same cache.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}

	async fn refresh(&self, seen: u64) -> Result<Token> {
		const KIND: FlowKind = FlowKind::Refresh;

		let inner = &self.0;
		let guard = inner.refresh_guard.lock().await;
		let old = {
			let state = inner.state.lock();

			if let Some(outcome) = state.last.clone().filter(|_| state.generation != seen) {
				inner.metrics.record_cache_hit();
				obs::record_flow_outcome(KIND, FlowOutcome::Reused);

				return outcome.into_result();
			}

			state.cached.clone()
		};

		inner.metrics.record_attempt();
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = match inner.source.token().await {
			Ok(token) if token.is_usable() => Ok(token),
			Ok(_) => Err(RefreshError::empty_access_token()),
			Err(e) => Err(RefreshError::new(e)),
		};

		let generation = {
			let mut state = inner.state.lock();

			state.generation = state.generation.wrapping_add(1);

			match &result {
				Ok(token) => {
					state.cached = Some(token.clone());
					state.cooldown = None;
					state.last = Some(Outcome::Token(token.clone()));
				},
				Err(err) => {
					state.cached = None;
					state.last = Some(Outcome::Failed(err.clone()));

					if err.is_terminal() && inner.config.cooldown.is_positive() {
						state.cooldown = Some(Cooldown {
							until: token::saturating_add(
								OffsetDateTime::now_utc(),
								inner.config.cooldown,
							),
							error: err.clone(),
						});
					}
				},
			}

			state.generation
		};

		drop(guard);

		match result {
			Ok(token) => {
				inner.metrics.record_success();
				obs::record_flow_outcome(KIND, FlowOutcome::Success);
				obs::event!(
					debug,
					fingerprint = %token.access_token.fingerprint(),
					"Access token refreshed."
				);

				let save_error = self.persist(&token, generation).await;

				self.notify(old.as_ref(), Some(&token), save_error.as_ref());

				Ok(token)
			},
			Err(err) => {
				inner.metrics.record_failure();
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				obs::event!(warn, kind = %err.kind(), error = %err, "Access token refresh failed.");

				let err = Error::Refresh(err);

				self.notify(old.as_ref(), None, Some(&err));

				Err(err)
			},
		}
	}

	async fn persist(&self, token: &Token, generation: u64) -> Option<Error> {
		let store = self.store()?;
		let mut persisted = self.0.persisted.lock().await;

		if *persisted > generation {
			obs::event!(
				debug,
				generation,
				persisted = *persisted,
				"Skipping save of a superseded access token."
			);

			return None;
		}

		*persisted = generation;

		let err = store.save(token.clone()).await.err()?;

		obs::event!(warn, error = %err, "Failed to persist the refreshed access token.");

		Some(err.into())
	}

	fn notify(&self, old: Option<&Token>, new: Option<&Token>, error: Option<&Error>) {
		if let Some(callback) = self.callback() {
			callback.notify(old, new, error);
		}
	}
}
impl TokenSource for ReuseTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		Box::pin(ReuseTokenSource::token(self))
	}
}
impl Debug for ReuseTokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.0.state.lock();

		f.debug_struct("ReuseTokenSource")
			.field("config", &self.0.config)
			.field("cached", &state.cached)
			.field("generation", &state.generation)
			.field("cooling_down", &state.cooldown.is_some())
			.field("metrics", &self.0.metrics)
			.finish()
	}
}

/// Builder for [`ReuseTokenSource`].
pub struct ReuseTokenSourceBuilder {
	source: Arc<dyn TokenSource>,
	initial: Option<Token>,
	config: ReuseConfig,
	store: Option<Arc<dyn TokenStore>>,
	callback: Option<Arc<dyn TokenCallback>>,
}
impl ReuseTokenSourceBuilder {
	fn new(source: Arc<dyn TokenSource>) -> Self {
		Self { source, initial: None, config: ReuseConfig::default(), store: None, callback: None }
	}

	/// Seeds the cache; unusable tokens are ignored.
	pub fn token(mut self, token: Token) -> Self {
		self.initial = Some(token).filter(Token::is_usable);

		self
	}

	/// Overrides the timing configuration.
	pub fn config(mut self, config: ReuseConfig) -> Self {
		self.config = config;

		self
	}

	/// Attaches a store that receives every refreshed token.
	pub fn store(mut self, store: Option<Arc<dyn TokenStore>>) -> Self {
		self.store = store;

		self
	}

	/// Attaches a refresh callback.
	pub fn callback(mut self, callback: Option<Arc<dyn TokenCallback>>) -> Self {
		self.callback = callback;

		self
	}

	/// Builds the source.
	pub fn build(self) -> ReuseTokenSource {
		ReuseTokenSource(Arc::new(ReuseInner {
			source: self.source,
			config: self.config,
			state: Mutex::new(CacheState { cached: self.initial, ..Default::default() }),
			refresh_guard: AsyncMutex::new(()),
			persisted: AsyncMutex::new(0),
			store: RwLock::new(self.store),
			callback: RwLock::new(self.callback),
			metrics: RefreshMetrics::default(),
		}))
	}
}
impl Debug for ReuseTokenSourceBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReuseTokenSourceBuilder")
			.field("initial", &self.initial)
			.field("config", &self.config)
			.field("store", &self.store.is_some())
			.field("callback", &self.callback.is_some())
			.finish()
	}
}

struct ReuseInner {
	source: Arc<dyn TokenSource>,
	config: ReuseConfig,
	state: Mutex<CacheState>,
	refresh_guard: AsyncMutex<()>,
	// Generation of the newest token handed to the store.
	persisted: AsyncMutex<u64>,
	store: RwLock<Option<Arc<dyn TokenStore>>>,
	callback: RwLock<Option<Arc<dyn TokenCallback>>>,
	metrics: RefreshMetrics,
}

#[derive(Default)]
struct CacheState {
	cached: Option<Token>,
	// Bumped by every completed refresh; waiters compare it to detect a finished cycle.
	generation: u64,
	last: Option<Outcome>,
	cooldown: Option<Cooldown>,
}

#[derive(Clone)]
enum Outcome {
	Token(Token),
	Failed(RefreshError),
}
impl Outcome {
	fn into_result(self) -> Result<Token> {
		match self {
			Self::Token(token) => Ok(token),
			Self::Failed(err) => Err(err.into()),
		}
	}
}

struct Cooldown {
	until: OffsetDateTime,
	error: RefreshError,
}
