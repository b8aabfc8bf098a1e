// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use color_eyre::Result;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
// self
use oauth2_autorenew::{
	callback::FnCallback,
	error::Error,
	reuse::{ReuseConfig, ReuseTokenSource},
	source::{TokenFuture, TokenSource},
	store::{StoreError, StoreFuture, TokenStore},
	token::Token,
};

struct SlowSource {
	calls: AtomicUsize,
	fail: Option<fn() -> Error>,
	expires_in: Duration,
}
impl SlowSource {
	fn ok(expires_in: Duration) -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: None, expires_in })
	}

	fn failing(fail: fn() -> Error) -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: Some(fail), expires_in: Duration::ZERO })
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenSource for SlowSource {
	fn token(&self) -> TokenFuture<'_> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

		Box::pin(async move {
			tokio::time::sleep(std::time::Duration::from_millis(50)).await;

			match self.fail {
				Some(fail) => Err(fail()),
				None => Ok(Token::builder()
					.access_token(format!("access-{call}"))
					.refresh_token("refresh")
					.expires_at(OffsetDateTime::now_utc() + self.expires_in)
					.build()),
			}
		})
	}
}

struct BrokenStore;
impl TokenStore for BrokenStore {
	fn load(&self) -> StoreFuture<'_, Option<Token>> {
		Box::pin(async { Ok(None) })
	}

	fn save(&self, _: Token) -> StoreFuture<'_, ()> {
		Box::pin(async { Err(StoreError::Backend { message: "disk full".into() }) })
	}
}

// Hangs on the first exchange and answers every later one immediately.
struct StallsOnce {
	calls: AtomicUsize,
}
impl TokenSource for StallsOnce {
	fn token(&self) -> TokenFuture<'_> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

		Box::pin(async move {
			if call == 1 {
				tokio::time::sleep(std::time::Duration::from_secs(60)).await;
			}

			Ok(Token::builder()
				.access_token(format!("access-{call}"))
				.expires_in(Duration::hours(1))
				.build())
		})
	}
}

// Delays the first save so a later refresh can finish while it is pending.
#[derive(Default)]
struct SlowFirstSave {
	saves: AtomicUsize,
	stored: Mutex<Option<Token>>,
}
impl TokenStore for SlowFirstSave {
	fn load(&self) -> StoreFuture<'_, Option<Token>> {
		Box::pin(async { Ok(self.stored.lock().clone()) })
	}

	fn save(&self, token: Token) -> StoreFuture<'_, ()> {
		let save = self.saves.fetch_add(1, Ordering::SeqCst) + 1;

		Box::pin(async move {
			if save == 1 {
				tokio::time::sleep(std::time::Duration::from_millis(200)).await;
			}

			*self.stored.lock() = Some(token);

			Ok(())
		})
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_refresh() {
	let source = SlowSource::ok(Duration::hours(1));
	let reuse = ReuseTokenSource::new(source.clone(), None);
	let handles = (0..16)
		.map(|_| {
			let reuse = reuse.clone();

			tokio::spawn(async move { reuse.token().await })
		})
		.collect::<Vec<_>>();
	let mut tokens = Vec::new();

	for handle in handles {
		tokens.push(
			handle.await.expect("Caller task should join.").expect("Refresh should succeed."),
		);
	}

	assert_eq!(source.calls(), 1);
	assert!(tokens.iter().all(|token| token == &tokens[0]));
	assert_eq!(reuse.metrics().attempts(), 1);
	assert_eq!(reuse.metrics().cache_hits(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_terminal_failure() {
	let source =
		SlowSource::failing(|| Error::InvalidGrant { reason: "refresh token revoked".into() });
	let reuse = ReuseTokenSource::new(source.clone(), None);
	let handles = (0..16)
		.map(|_| {
			let reuse = reuse.clone();

			tokio::spawn(async move { reuse.token().await })
		})
		.collect::<Vec<_>>();
	let mut errors = Vec::new();

	for handle in handles {
		match handle.await.expect("Caller task should join.") {
			Err(Error::Refresh(err)) => errors.push(err),
			other => panic!("Unexpected outcome: {other:?}."),
		}
	}

	assert_eq!(source.calls(), 1);
	assert!(errors.iter().all(|err| err.is_terminal() && err.same_cycle(&errors[0])));
}

#[tokio::test]
async fn fresh_token_is_never_refreshed() {
	let source = SlowSource::ok(Duration::hours(1));
	let seed = Token::builder()
		.access_token("seed")
		.expires_at(OffsetDateTime::now_utc() + Duration::minutes(10))
		.build();
	let reuse = ReuseTokenSource::builder(source.clone())
		.token(seed.clone())
		.config(ReuseConfig::default().with_skew(Duration::minutes(1)))
		.build();

	for _ in 0..100 {
		assert_eq!(reuse.token().await.expect("Cached token should be served."), seed);
	}

	assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn save_failures_reach_the_callback_but_not_the_caller() {
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&events);
	let callback =
		FnCallback::new(move |_: Option<&Token>, new: Option<&Token>, err: Option<&Error>| {
			sink.lock().push((new.is_some(), err.map(|err| matches!(err, Error::Storage(_)))));
		});
	// Tokens expire immediately so every call refreshes.
	let source = SlowSource::ok(Duration::ZERO);
	let reuse = ReuseTokenSource::builder(source.clone())
		.store(Some(Arc::new(BrokenStore)))
		.callback(Some(Arc::new(callback)))
		.build();

	for call in 1..=3 {
		let token = reuse.token().await.expect("Save failures must not fail the caller.");

		assert_eq!(token.access_token.expose(), format!("access-{call}"));
	}

	assert_eq!(source.calls(), 3);
	assert_eq!(*events.lock(), vec![(true, Some(true)); 3]);
}

#[tokio::test]
async fn failed_refresh_notifies_without_a_new_token() {
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&events);
	let callback =
		FnCallback::new(move |old: Option<&Token>, new: Option<&Token>, err: Option<&Error>| {
			sink.lock().push((old.is_some(), new.is_some(), err.is_some()));
		});
	let source = SlowSource::failing(|| Error::Revoked);
	let reuse = ReuseTokenSource::builder(source)
		.token(Token::builder().access_token("stale").expires_in(Duration::seconds(1)).build())
		.callback(Some(Arc::new(callback)))
		.build();

	reuse.token().await.expect_err("Revoked grants should fail.");

	assert_eq!(*events.lock(), vec![(true, false, true)]);
	assert!(reuse.cached().is_none());
}

#[tokio::test]
async fn cancelled_leader_hands_the_refresh_to_a_waiter() -> Result<()> {
	let source = Arc::new(StallsOnce { calls: AtomicUsize::new(0) });
	let reuse = ReuseTokenSource::new(source.clone(), None);
	let leader = tokio::spawn({
		let reuse = reuse.clone();

		async move { reuse.token().await }
	});

	tokio::time::sleep(std::time::Duration::from_millis(20)).await;

	let follower = tokio::spawn({
		let reuse = reuse.clone();

		async move { reuse.token().await }
	});

	tokio::time::sleep(std::time::Duration::from_millis(20)).await;
	leader.abort();

	assert!(leader.await.is_err_and(|err| err.is_cancelled()));

	let token = follower.await??;

	assert_eq!(token.access_token.expose(), "access-2");
	assert_eq!(source.calls.load(Ordering::SeqCst), 2);

	Ok(())
}

#[tokio::test]
async fn slow_save_never_overwrites_a_newer_token() -> Result<()> {
	let source = SlowSource::ok(Duration::hours(1));
	let store = Arc::new(SlowFirstSave::default());
	let reuse = ReuseTokenSource::builder(source.clone()).store(Some(store.clone())).build();
	let first = tokio::spawn({
		let reuse = reuse.clone();

		async move { reuse.token().await }
	});

	// The first exchange takes 50ms; its save is still pending afterwards.
	tokio::time::sleep(std::time::Duration::from_millis(100)).await;

	let stale = reuse.cached().expect("First refresh should have populated the cache.");

	assert_eq!(stale.access_token.expose(), "access-1");
	assert!(reuse.invalidate(&stale));

	let newer = reuse.token().await?;

	assert_eq!(first.await??, stale);
	assert_eq!(newer.access_token.expose(), "access-2");
	assert_eq!(*store.stored.lock(), Some(newer));
	assert_eq!(store.saves.load(Ordering::SeqCst), 2);

	Ok(())
}
