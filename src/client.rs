//! Client wrapper that composes the authorization layer onto an existing transport.
//!
//! Options are applied to a [`Client`] in any order except one: OAuth must be configured before
//! auto-renewal is enabled. Every option validates its input before touching the client, so a
//! failed call leaves the transport chain exactly as it was. Repeated options reuse the existing
//! [`AuthenticatedTransport`] instead of stacking a second layer.

// self
use crate::{
	_prelude::*,
	callback::TokenCallback,
	error::ConfigError,
	http::{self, HttpRequest, HttpResponse, HttpTransport},
	obs,
	reuse::ReuseTokenSource,
	source::{OAuthConfig, RefreshTokenSource, StaticTokenSource},
	store::{MemoryStore, TokenStore},
	token::Token,
	transport::{AuthenticatedTransport, OAuthBinding},
};

/// API client handle owning the composed transport chain.
///
/// To tune refresh timing, wrap the base transport in
/// [`AuthenticatedTransport::with_reuse_config`] before handing it to [`Client::new`]; options
/// then reuse that layer.
#[derive(Clone)]
pub struct Client {
	transport: Arc<dyn HttpTransport>,
}
impl Client {
	/// Creates a client over `transport`.
	pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
		Self { transport }
	}

	/// Creates a client over an existing reqwest client.
	#[cfg(feature = "reqwest")]
	pub fn from_reqwest(client: ReqwestClient) -> Self {
		Self::new(Arc::new(crate::http::ReqwestTransport::with_client(client)))
	}

	/// Current outermost transport.
	pub fn transport(&self) -> &Arc<dyn HttpTransport> {
		&self.transport
	}

	/// Returns the authorization layer, wrapping the transport only when none exists yet.
	pub fn wrap_transport(&mut self) -> AuthenticatedTransport {
		if let Some(layer) = self.extract_wrapper() {
			return layer;
		}

		let layer = AuthenticatedTransport::new(Arc::clone(&self.transport));

		self.transport = Arc::new(layer.clone());

		layer
	}

	/// Innermost transport with every decorator removed.
	pub fn extract_base_transport(&self) -> Arc<dyn HttpTransport> {
		http::innermost(&self.transport)
	}

	/// Authorization layer in the chain, if any.
	pub fn extract_wrapper(&self) -> Option<AuthenticatedTransport> {
		http::find_authenticated(&self.transport)
	}

	/// Configures OAuth with a fixed `token`.
	///
	/// The token is sent until the server rejects it; enable
	/// [`with_auto_renewal_token`](Self::with_auto_renewal_token) to refresh it. When auto-renewal
	/// is already enabled, the new configuration and token replace the old ones and keep
	/// refreshing.
	pub fn with_oauth(&mut self, config: OAuthConfig, token: Token) -> Result<()> {
		if !token.is_usable() && !token.has_refresh_token() {
			return Err(ConfigError::EmptyToken.into());
		}

		let layer = self.wrap_transport();
		let auto_renewal = layer.binding().is_some_and(|binding| binding.auto_renewal);
		let binding = OAuthBinding { config: Arc::new(config), token, auto_renewal };
		let source = if auto_renewal {
			self.refreshing_source(&layer, &binding.config, binding.token.clone())
		} else {
			ReuseTokenSource::builder(Arc::new(StaticTokenSource::new(binding.token.clone())))
				.token(binding.token.clone())
				.config(layer.reuse_config())
				.store(layer.store())
				.callback(layer.callback())
				.build()
		};

		layer.set_binding(binding);
		layer.set_token_source(Some(source));

		Ok(())
	}

	/// Replaces the fixed token with one that refreshes itself through the token endpoint.
	///
	/// Fails with [`ConfigError::AutoRenewalWithoutOAuth`] when OAuth is not configured. The
	/// starting token is taken from the attached store, then from the current cache, then from
	/// the token given to [`with_oauth`](Self::with_oauth). A [`MemoryStore`] is attached when
	/// no store is configured.
	pub async fn with_auto_renewal_token(&mut self) -> Result<()> {
		let (layer, binding) = self
			.extract_wrapper()
			.and_then(|layer| layer.binding().map(|binding| (layer, binding)))
			.ok_or(ConfigError::AutoRenewalWithoutOAuth)?;
		let stored = match layer.store() {
			Some(store) => store.load().await.unwrap_or_else(|_e| {
				obs::event!(warn, error = %_e, "Failed to load the persisted token, ignoring it.");

				None
			}),
			None => None,
		};
		let cached = layer.token_source().and_then(|source| source.cached());
		let seed = seed_token(stored, cached, &binding.token);

		if layer.store().is_none() {
			layer.set_store(Some(Arc::new(MemoryStore::default())));
		}

		let source = self.refreshing_source(&layer, &binding.config, seed);

		layer.set_binding(OAuthBinding { auto_renewal: true, ..binding });
		layer.set_token_source(Some(source));

		Ok(())
	}

	/// Attaches a token store, wrapping the transport if needed.
	pub fn with_token_store(&mut self, store: Arc<dyn TokenStore>) -> Result<()> {
		self.wrap_transport().set_store(Some(store));

		Ok(())
	}

	/// Attaches a refresh callback, wrapping the transport if needed.
	pub fn with_token_callback(&mut self, callback: Arc<dyn TokenCallback>) -> Result<()> {
		self.wrap_transport().set_callback(Some(callback));

		Ok(())
	}

	/// Configures OAuth and enables auto-renewal in one step.
	pub async fn with_oauth_with_auto_renewal(
		&mut self,
		config: OAuthConfig,
		token: Token,
	) -> Result<()> {
		self.with_oauth(config, token)?;
		self.with_auto_renewal_token().await
	}

	/// Returns a currently valid token for manual header construction.
	pub async fn obtain_token(&self) -> Result<Token> {
		let source = self
			.extract_wrapper()
			.and_then(|layer| layer.token_source())
			.ok_or(ConfigError::OAuthNotConfigured)?;

		source.token().await
	}

	/// Sends `request` through the composed transport chain.
	pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
		self.transport.round_trip(request).await
	}

	fn refreshing_source(
		&self,
		layer: &AuthenticatedTransport,
		config: &Arc<OAuthConfig>,
		seed: Token,
	) -> ReuseTokenSource {
		let refresher =
			RefreshTokenSource::new(Arc::clone(config), seed.clone(), self.extract_base_transport());

		ReuseTokenSource::builder(Arc::new(refresher))
			.token(seed)
			.config(layer.reuse_config())
			.store(layer.store())
			.callback(layer.callback())
			.build()
	}
}
#[cfg(feature = "reqwest")]
impl Default for Client {
	fn default() -> Self {
		Self::new(Arc::new(crate::http::ReqwestTransport::default()))
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client").field("wrapper", &self.extract_wrapper()).finish()
	}
}

// Picks the first candidate that can authorize or refresh, backfilling a missing refresh token.
fn seed_token(stored: Option<Token>, cached: Option<Token>, configured: &Token) -> Token {
	let mut seed = [stored, cached]
		.into_iter()
		.flatten()
		.find(|token| token.is_usable() || token.has_refresh_token())
		.unwrap_or_else(|| configured.clone());

	if !seed.has_refresh_token() {
		seed.refresh_token = configured.refresh_token.clone();
	}

	seed
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::TransportFuture;

	struct Ok200;
	impl HttpTransport for Ok200 {
		fn round_trip(&self, _: HttpRequest) -> TransportFuture<'_> {
			Box::pin(async { Ok(HttpResponse::new(Vec::new())) })
		}
	}

	fn config() -> OAuthConfig {
		OAuthConfig::builder("client")
			.token_url(Url::parse("https://auth.example.com/token").expect("URL should parse."))
			.build()
			.expect("Config fixture should be valid.")
	}

	#[test]
	fn seed_prefers_store_then_cache_then_configured() {
		let configured = Token::builder().access_token("configured").refresh_token("r0").build();
		let stored = Token::builder().access_token("stored").refresh_token("r1").build();
		let cached = Token::bearer("cached");

		assert_eq!(
			seed_token(Some(stored.clone()), Some(cached.clone()), &configured),
			stored
		);

		let seed = seed_token(Some(Token::default()), Some(cached), &configured);

		assert_eq!(seed.access_token.expose(), "cached");
		assert_eq!(seed.refresh_token.as_ref().map(|secret| secret.expose()), Some("r0"));
		assert_eq!(seed_token(None, None, &configured), configured);
	}

	#[test]
	fn with_oauth_rejects_empty_tokens_without_wrapping() {
		let mut client = Client::new(Arc::new(Ok200));
		let before = Arc::clone(client.transport());
		let err = client
			.with_oauth(config(), Token::default())
			.expect_err("Empty tokens must be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::EmptyToken)));
		assert!(Arc::ptr_eq(client.transport(), &before));
	}

	#[tokio::test]
	async fn obtain_token_requires_oauth() {
		let mut client = Client::new(Arc::new(Ok200));

		client.with_token_store(Arc::new(MemoryStore::default())).expect("Store should attach.");

		let err = client.obtain_token().await.expect_err("OAuth is not configured yet.");

		assert!(matches!(err, Error::Config(ConfigError::OAuthNotConfigured)));

		client.with_oauth(config(), Token::bearer("fixed")).expect("OAuth should configure.");

		let token = client.obtain_token().await.expect("Configured token should be served.");

		assert_eq!(token.access_token.expose(), "fixed");
	}

	#[tokio::test]
	async fn auto_renewal_installs_a_memory_store() {
		let mut client = Client::new(Arc::new(Ok200));

		client
			.with_oauth_with_auto_renewal(
				config(),
				Token::builder().access_token("a").refresh_token("r").build(),
			)
			.await
			.expect("Both options should apply.");

		let layer = client.extract_wrapper().expect("Client should be wrapped.");

		assert!(layer.store().is_some());
		assert_eq!(http::authenticated_depth(client.transport()), 1);
		assert_eq!(
			layer.token_source().and_then(|source| source.cached()).map(|token| token.access_token),
			Some(crate::token::TokenSecret::new("a"))
		);
	}
}
