//! Refresh-token grant source backed by the `oauth2` crate.
//!
//! Each call performs one `grant_type=refresh_token` exchange through an [`HttpTransport`].
//! Rotated refresh tokens are remembered for the next exchange; when the provider omits a new
//! refresh token the previous one is carried over onto the returned [`Token`].

// std
use std::collections::BTreeMap;
// crates.io
use oauth2::{
	HttpClientError, RefreshToken, RequestTokenError, Scope, TokenResponse,
	basic::{BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError, TransportError},
	http::{HttpTransport, ResponseMetadata, ResponseMetadataSlot, TokenEndpointClient},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	source::{
		DefaultProviderStrategy, OAuthConfig, ProviderErrorContext, ProviderErrorKind,
		ProviderStrategy, TokenFuture, TokenSource,
	},
	token::{Token, TokenSecret},
};

/// Exchanges the current refresh token for a new access token on every call.
pub struct RefreshTokenSource {
	config: Arc<OAuthConfig>,
	transport: Arc<dyn HttpTransport>,
	strategy: Arc<dyn ProviderStrategy>,
	current: Mutex<Token>,
}
impl RefreshTokenSource {
	/// Creates a source that refreshes `token` against `config.token_url` via `transport`.
	///
	/// `transport` must not be an authorization layer; pass the client's base transport.
	pub fn new(config: Arc<OAuthConfig>, token: Token, transport: Arc<dyn HttpTransport>) -> Self {
		Self {
			config,
			transport,
			strategy: Arc::new(DefaultProviderStrategy),
			current: Mutex::new(token),
		}
	}

	/// Replaces the provider strategy used to augment requests and classify errors.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// OAuth settings used for exchanges.
	pub fn config(&self) -> &OAuthConfig {
		&self.config
	}

	/// Refresh token that the next exchange will present.
	pub fn refresh_token(&self) -> Option<TokenSecret> {
		self.current.lock().refresh_token.clone()
	}

	async fn exchange(&self) -> Result<Token> {
		const KIND: FlowKind = FlowKind::Exchange;

		let span = FlowSpan::new(KIND, "refresh_grant");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.exchange_inner()).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn exchange_inner(&self) -> Result<Token> {
		let previous = self
			.current
			.lock()
			.refresh_token
			.clone()
			.filter(|secret| !secret.is_empty())
			.ok_or(ConfigError::MissingRefreshToken)?;
		let client = self.config.refresh_client()?;
		let slot = ResponseMetadataSlot::default();
		let http_client = TokenEndpointClient::new(Arc::clone(&self.transport), slot.clone());
		let refresh_secret = RefreshToken::new(previous.expose().to_owned());
		let mut request = client.exchange_refresh_token(&refresh_secret);

		for scope in &self.config.scopes {
			request = request.add_scope(Scope::new(scope.clone()));
		}

		let mut extra = BTreeMap::new();

		self.strategy.augment_token_request(&mut extra);

		for (key, value) in extra {
			request = request.add_extra_param(key, value);
		}

		let response = request
			.request_async(&http_client)
			.await
			.map_err(|err| map_request_error(self.strategy.as_ref(), slot.take(), err))?;
		let token = map_refresh_response(&self.config.scopes, previous, response)?;

		*self.current.lock() = token.clone();

		Ok(token)
	}
}
impl TokenSource for RefreshTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		Box::pin(self.exchange())
	}
}
impl Debug for RefreshTokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshTokenSource")
			.field("config", &self.config)
			.field("current", &*self.current.lock())
			.finish()
	}
}

fn map_refresh_response(
	requested_scope: &[String],
	previous_refresh: TokenSecret,
	response: BasicTokenResponse,
) -> Result<Token> {
	let mut builder = Token::builder()
		.access_token(response.access_token().secret().to_owned())
		.token_type(response.token_type().as_ref().to_owned())
		.issued_at(OffsetDateTime::now_utc());

	if let Some(expires_in) = response.expires_in() {
		let secs =
			i64::try_from(expires_in.as_secs()).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

		if secs <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		builder = builder.expires_in(Duration::seconds(secs));
	}

	builder = match response.scopes() {
		Some(scopes) => builder.scopes(scopes.iter().map(|scope| scope.as_str().to_owned())),
		None => builder.scopes(requested_scope.iter().cloned()),
	};
	builder = match response.refresh_token() {
		Some(rotated) => builder.refresh_token(rotated.secret().to_owned()),
		None => builder.refresh_token(previous_refresh.expose().to_owned()),
	};

	Ok(builder.build())
}

fn map_request_error(
	strategy: &dyn ProviderStrategy,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<Error>>,
) -> Error {
	let meta = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, response, meta),
		RequestTokenError::Request(error) => map_transport_error(meta, error),
		RequestTokenError::Parse(source, body) => {
			let mut ctx = ProviderErrorContext::default()
				.with_body_preview(String::from_utf8_lossy(&body).into_owned());

			if let Some(status) = meta_status(meta) {
				ctx = ctx.with_http_status(status);
			}

			match strategy.classify_token_error(&ctx) {
				// Success statuses with an unreadable body are always a parse problem.
				_ if meta_status(meta).is_some_and(|status| status < 300) =>
					TransientError::TokenResponseParse { source, status: meta_status(meta) }.into(),
				ProviderErrorKind::Transient =>
					TransientError::TokenResponseParse { source, status: meta_status(meta) }.into(),
				kind => classified_error(
					kind,
					format!(
						"Token endpoint returned HTTP {} with a non-OAuth body",
						meta_status(meta).unwrap_or_default()
					),
					meta,
				),
			}
		},
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_server_response_error(
	strategy: &dyn ProviderStrategy,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let mut ctx =
		ProviderErrorContext::default().with_oauth_error(response.error().as_ref().to_string());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let message = match response.error_description() {
		Some(description) => format!("Token endpoint returned an OAuth error: {description}"),
		None => format!("Token endpoint returned an OAuth error: {}", response.error().as_ref()),
	};

	classified_error(strategy.classify_token_error(&ctx), message, meta)
}

fn classified_error(
	kind: ProviderErrorKind,
	message: String,
	meta: Option<&ResponseMetadata>,
) -> Error {
	match kind {
		ProviderErrorKind::InvalidGrant => Error::InvalidGrant { reason: message },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason: message },
		ProviderErrorKind::InsufficientScope => Error::InsufficientScope { reason: message },
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn map_transport_error(meta: Option<&ResponseMetadata>, err: HttpClientError<Error>) -> Error {
	match err {
		HttpClientError::Reqwest(inner) => *inner,
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => TransientError::TokenEndpoint {
			message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
		_ => TransientError::TokenEndpoint {
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::{StatusCode, header::CONTENT_TYPE};
	// self
	use super::*;
	use crate::http::{HttpRequest, HttpResponse, TransportFuture};

	struct CannedEndpoint {
		status: StatusCode,
		body: &'static str,
		seen: Mutex<Vec<String>>,
	}
	impl CannedEndpoint {
		fn new(status: StatusCode, body: &'static str) -> Arc<Self> {
			Arc::new(Self { status, body, seen: Mutex::new(Vec::new()) })
		}
	}
	impl HttpTransport for CannedEndpoint {
		fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
			self.seen.lock().push(String::from_utf8_lossy(request.body()).into_owned());

			let mut response = HttpResponse::new(self.body.as_bytes().to_vec());

			*response.status_mut() = self.status;
			response
				.headers_mut()
				.insert(CONTENT_TYPE, "application/json".parse().expect("Header should parse."));

			Box::pin(async move { Ok(response) })
		}
	}

	fn config() -> Arc<OAuthConfig> {
		Arc::new(
			OAuthConfig::builder("client-id")
				.client_secret("client-secret")
				.token_url(Url::parse("https://auth.example.com/token").expect("URL should parse."))
				.scopes(["repo"])
				.build()
				.expect("Config fixture should be valid."),
		)
	}

	fn seed() -> Token {
		Token::builder().access_token("old-access").refresh_token("old-refresh").build()
	}

	#[tokio::test]
	async fn keeps_previous_refresh_token_when_not_rotated() {
		let endpoint = CannedEndpoint::new(
			StatusCode::OK,
			"{\"access_token\":\"new-access\",\"token_type\":\"bearer\",\"expires_in\":3600}",
		);
		let source = RefreshTokenSource::new(config(), seed(), endpoint.clone());
		let token = source.token().await.expect("Refresh should succeed.");

		assert_eq!(token.access_token.expose(), "new-access");
		assert_eq!(token.refresh_token.as_ref().map(TokenSecret::expose), Some("old-refresh"));
		assert_eq!(token.scope, vec!["repo".to_string()]);
		assert!(token.expires_at.is_some());

		let seen = endpoint.seen.lock();

		assert_eq!(seen.len(), 1);
		assert!(seen[0].contains("grant_type=refresh_token"));
		assert!(seen[0].contains("refresh_token=old-refresh"));
	}

	#[tokio::test]
	async fn remembers_rotated_refresh_token() {
		let endpoint = CannedEndpoint::new(
			StatusCode::OK,
			"{\"access_token\":\"a2\",\"refresh_token\":\"r2\",\"token_type\":\"bearer\"}",
		);
		let source = RefreshTokenSource::new(config(), seed(), endpoint);
		let token = source.token().await.expect("Refresh should succeed.");

		assert!(token.expires_at.is_none());
		assert_eq!(source.refresh_token().as_ref().map(TokenSecret::expose), Some("r2"));
	}

	#[tokio::test]
	async fn invalid_grant_is_classified_terminal() {
		let endpoint = CannedEndpoint::new(
			StatusCode::BAD_REQUEST,
			"{\"error\":\"invalid_grant\",\"error_description\":\"refresh token revoked\"}",
		);
		let source = RefreshTokenSource::new(config(), seed(), endpoint);
		let err = source.token().await.expect_err("Invalid grant should surface.");

		assert!(matches!(err, Error::InvalidGrant { .. }));
		assert!(err.is_terminal());
	}

	#[tokio::test]
	async fn server_errors_are_transient_with_status() {
		let endpoint = CannedEndpoint::new(
			StatusCode::SERVICE_UNAVAILABLE,
			"{\"error\":\"temporarily_unavailable\"}",
		);
		let source = RefreshTokenSource::new(config(), seed(), endpoint);
		let err = source.token().await.expect_err("Server errors should surface.");

		match err {
			Error::Transient(TransientError::TokenEndpoint { status, .. }) =>
				assert_eq!(status, Some(503)),
			other => panic!("Unexpected error variant: {other:?}."),
		}
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_network() {
		let endpoint = CannedEndpoint::new(StatusCode::OK, "{}");
		let source = RefreshTokenSource::new(config(), Token::bearer("access-only"), endpoint.clone());
		let err = source.token().await.expect_err("Missing refresh token should fail.");

		assert!(matches!(err, Error::Config(ConfigError::MissingRefreshToken)));
		assert!(endpoint.seen.lock().is_empty());
	}
}
