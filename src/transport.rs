//! Authorization layer that decorates any [`HttpTransport`].
//!
//! Every request obtains a token from the installed [`ReuseTokenSource`], carries it in the
//! `Authorization` header, and is replayed at most once after a 401. A layer without a token
//! source forwards requests untouched, which lets store and callback options be applied before
//! OAuth is configured.

// crates.io
use oauth2::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	callback::TokenCallback,
	error::ConfigError,
	http::{self, HttpRequest, HttpResponse, HttpTransport, TransportFuture},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	reuse::{ReuseConfig, ReuseTokenSource},
	source::OAuthConfig,
	store::TokenStore,
	token::Token,
};

/// OAuth settings recorded when OAuth is configured, consumed when auto-renewal is enabled.
#[derive(Clone, Debug)]
pub(crate) struct OAuthBinding {
	pub(crate) config: Arc<OAuthConfig>,
	pub(crate) token: Token,
	pub(crate) auto_renewal: bool,
}

/// Cheap-clone handle to one authorization layer; clones share configuration and cache.
#[derive(Clone)]
pub struct AuthenticatedTransport(Arc<AuthInner>);
impl AuthenticatedTransport {
	/// Wraps `base` with default reuse settings and no token source.
	pub fn new(base: Arc<dyn HttpTransport>) -> Self {
		Self::with_reuse_config(base, ReuseConfig::default())
	}

	/// Wraps `base`; sources installed later by the client use `reuse_config`.
	pub fn with_reuse_config(base: Arc<dyn HttpTransport>, reuse_config: ReuseConfig) -> Self {
		Self(Arc::new(AuthInner {
			base,
			reuse_config,
			source: RwLock::new(None),
			store: RwLock::new(None),
			callback: RwLock::new(None),
			binding: RwLock::new(None),
		}))
	}

	/// Transport this layer delegates to.
	pub fn base(&self) -> Arc<dyn HttpTransport> {
		Arc::clone(&self.0.base)
	}

	/// Installed token source, if OAuth was configured.
	pub fn token_source(&self) -> Option<ReuseTokenSource> {
		self.0.source.read().clone()
	}

	/// Swaps the token source; in-flight requests finish with the source they started with.
	pub fn set_token_source(&self, source: Option<ReuseTokenSource>) {
		*self.0.source.write() = source;
	}

	/// Store attached to this layer.
	pub fn store(&self) -> Option<Arc<dyn TokenStore>> {
		self.0.store.read().clone()
	}

	/// Attaches a store to this layer and to the live token source.
	pub fn set_store(&self, store: Option<Arc<dyn TokenStore>>) {
		if let Some(source) = self.token_source() {
			source.set_store(store.clone());
		}

		*self.0.store.write() = store;
	}

	/// Callback attached to this layer.
	pub fn callback(&self) -> Option<Arc<dyn TokenCallback>> {
		self.0.callback.read().clone()
	}

	/// Attaches a callback to this layer and to the live token source.
	pub fn set_callback(&self, callback: Option<Arc<dyn TokenCallback>>) {
		if let Some(source) = self.token_source() {
			source.set_callback(callback.clone());
		}

		*self.0.callback.write() = callback;
	}

	/// Timing settings applied to token sources installed on this layer.
	pub fn reuse_config(&self) -> ReuseConfig {
		self.0.reuse_config
	}

	/// Returns `true` when both handles refer to the same layer.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}

	pub(crate) fn binding(&self) -> Option<OAuthBinding> {
		self.0.binding.read().clone()
	}

	pub(crate) fn set_binding(&self, binding: OAuthBinding) {
		*self.0.binding.write() = Some(binding);
	}

	async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let Some(source) = self.token_source() else {
			return self.0.base.round_trip(request).await;
		};
		let span = FlowSpan::new(KIND, "round_trip");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.send_authorized(&source, request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn send_authorized(
		&self,
		source: &ReuseTokenSource,
		request: HttpRequest,
	) -> Result<HttpResponse> {
		let token = source.token().await?;
		let replay = http::duplicate_request(&request);
		let response = self.0.base.round_trip(authorize(request, &token)?).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return Ok(response);
		}

		obs::record_flow_outcome(FlowKind::Request, FlowOutcome::Retry);
		obs::event!(
			debug,
			fingerprint = %token.access_token.fingerprint(),
			"Resource server rejected the access token, refreshing once."
		);

		source.invalidate(&token);

		let token = source.token().await?;

		self.0.base.round_trip(authorize(replay, &token)?).await
	}
}
impl HttpTransport for AuthenticatedTransport {
	fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(self.send(request))
	}

	fn inner(&self) -> Option<Arc<dyn HttpTransport>> {
		Some(self.base())
	}

	fn authenticated(&self) -> Option<AuthenticatedTransport> {
		Some(self.clone())
	}
}
impl Debug for AuthenticatedTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedTransport")
			.field("source", &self.token_source())
			.field("store", &self.store().is_some())
			.field("callback", &self.callback().is_some())
			.field("reuse_config", &self.0.reuse_config)
			.finish()
	}
}

struct AuthInner {
	base: Arc<dyn HttpTransport>,
	reuse_config: ReuseConfig,
	source: RwLock<Option<ReuseTokenSource>>,
	store: RwLock<Option<Arc<dyn TokenStore>>>,
	callback: RwLock<Option<Arc<dyn TokenCallback>>>,
	binding: RwLock<Option<OAuthBinding>>,
}

fn authorize(mut request: HttpRequest, token: &Token) -> Result<HttpRequest> {
	let mut value = HeaderValue::from_str(&token.authorization_value())
		.map_err(|source| ConfigError::InvalidAuthorizationHeader { source })?;

	value.set_sensitive(true);
	request.headers_mut().insert(AUTHORIZATION, value);

	Ok(request)
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::source::StaticTokenSource;

	#[derive(Default)]
	struct Recorder {
		headers: Mutex<Vec<Option<String>>>,
	}
	impl HttpTransport for Recorder {
		fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
			let header = request
				.headers()
				.get(AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.map(ToOwned::to_owned);

			self.headers.lock().push(header);

			Box::pin(async move { Ok(HttpResponse::new(Vec::new())) })
		}
	}

	struct Failing(AtomicUsize);
	impl crate::source::TokenSource for Failing {
		fn token(&self) -> crate::source::TokenFuture<'_> {
			self.0.fetch_add(1, Ordering::SeqCst);

			Box::pin(async { Err(Error::Revoked) })
		}
	}

	#[tokio::test]
	async fn passes_through_without_a_token_source() {
		let base = Arc::new(Recorder::default());
		let layer = AuthenticatedTransport::new(base.clone());

		layer.round_trip(HttpRequest::new(Vec::new())).await.expect("Request should pass through.");

		assert_eq!(*base.headers.lock(), vec![None]);
	}

	#[tokio::test]
	async fn sets_the_authorization_header() {
		let base = Arc::new(Recorder::default());
		let layer = AuthenticatedTransport::new(base.clone());
		let token = Token::builder().access_token("abc").token_type("bearer").build();

		layer.set_token_source(Some(ReuseTokenSource::new(
			Arc::new(StaticTokenSource::new(token.clone())),
			Some(token),
		)));
		layer.round_trip(HttpRequest::new(Vec::new())).await.expect("Request should succeed.");

		assert_eq!(*base.headers.lock(), vec![Some("Bearer abc".to_owned())]);
	}

	#[tokio::test]
	async fn token_failure_never_reaches_the_base_transport() {
		let base = Arc::new(Recorder::default());
		let layer = AuthenticatedTransport::new(base.clone());
		let source = Arc::new(Failing(AtomicUsize::new(0)));

		layer.set_token_source(Some(ReuseTokenSource::new(source.clone(), None)));

		let err = layer
			.round_trip(HttpRequest::new(Vec::new()))
			.await
			.expect_err("Token failures should fail the request.");

		assert!(err.is_terminal());
		assert!(base.headers.lock().is_empty());
		assert_eq!(source.0.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn header_rejects_control_characters() {
		let token = Token::bearer("bad\nvalue");
		let err = authorize(HttpRequest::new(Vec::new()), &token)
			.expect_err("Newlines are not valid header bytes.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidAuthorizationHeader { .. })));
	}

	#[test]
	fn marker_and_inner_expose_the_layer() {
		let base: Arc<dyn HttpTransport> = Arc::new(Recorder::default());
		let layer = AuthenticatedTransport::new(Arc::clone(&base));
		let wrapped: Arc<dyn HttpTransport> = Arc::new(layer.clone());

		assert!(Arc::ptr_eq(&http::innermost(&wrapped), &base));
		assert!(
			http::find_authenticated(&wrapped).is_some_and(|found| found.ptr_eq(&layer))
		);
		assert_eq!(http::authenticated_depth(&wrapped), 1);
	}
}
