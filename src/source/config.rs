//! OAuth client configuration consumed by [`RefreshTokenSource`](super::RefreshTokenSource).

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, TokenUrl, basic::BasicClient,
};
// self
use crate::{_prelude::*, error::ConfigError, token::TokenSecret};

pub(crate) type RefreshClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	#[default]
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
}

/// Errors raised while validating an [`OAuthConfig`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum OAuthConfigError {
	/// The client identifier is required.
	#[error("Missing client identifier.")]
	MissingClientId,
	/// The token endpoint is required.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Token endpoints must use HTTPS unless they point at a loopback host.
	#[error("The token endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scopes cannot be empty or contain whitespace.
	#[error("Scope is invalid: {scope:?}.")]
	InvalidScope {
		/// The offending scope string.
		scope: String,
	},
}

/// Validated OAuth client settings for the refresh-token grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthConfig {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Optional client secret for confidential clients.
	pub client_secret: Option<TokenSecret>,
	/// Token endpoint used for refreshes.
	pub token_url: Url,
	/// Scopes requested on every refresh, in order.
	pub scopes: Vec<String>,
	/// Client authentication method.
	pub auth_method: ClientAuthMethod,
}
impl OAuthConfig {
	/// Creates a builder.
	pub fn builder(client_id: impl Into<String>) -> OAuthConfigBuilder {
		OAuthConfigBuilder::new(client_id)
	}

	pub(crate) fn refresh_client(&self) -> Result<RefreshClient> {
		let token_url = TokenUrl::new(self.token_url.to_string())
			.map_err(|source| ConfigError::InvalidTokenUrl { source })?;
		let mut client =
			BasicClient::new(ClientId::new(self.client_id.clone())).set_token_uri(token_url);

		if let Some(secret) = &self.client_secret {
			client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}
		if matches!(self.auth_method, ClientAuthMethod::ClientSecretPost) {
			client = client.set_auth_type(AuthType::RequestBody);
		}

		Ok(client)
	}

	fn validate(&self) -> Result<(), OAuthConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(OAuthConfigError::MissingClientId);
		}

		validate_endpoint(&self.token_url)?;

		if let Some(scope) =
			self.scopes.iter().find(|scope| scope.is_empty() || scope.contains(char::is_whitespace))
		{
			return Err(OAuthConfigError::InvalidScope { scope: scope.clone() });
		}

		Ok(())
	}
}

/// Builder for [`OAuthConfig`] values.
#[derive(Debug)]
pub struct OAuthConfigBuilder {
	client_id: String,
	client_secret: Option<TokenSecret>,
	token_url: Option<Url>,
	scopes: Vec<String>,
	auth_method: ClientAuthMethod,
}
impl OAuthConfigBuilder {
	fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			token_url: None,
			scopes: Vec::new(),
			auth_method: ClientAuthMethod::default(),
		}
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Sets the token endpoint.
	pub fn token_url(mut self, url: Url) -> Self {
		self.token_url = Some(url);

		self
	}

	/// Appends a requested scope.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scopes.push(scope.into());

		self
	}

	/// Replaces the requested scopes.
	pub fn scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Overrides the client authentication method.
	pub fn auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.auth_method = method;

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<OAuthConfig, OAuthConfigError> {
		let token_url = self.token_url.ok_or(OAuthConfigError::MissingTokenEndpoint)?;
		let config = OAuthConfig {
			client_id: self.client_id,
			client_secret: self.client_secret,
			token_url,
			scopes: self.scopes,
			auth_method: self.auth_method,
		};

		config.validate()?;

		Ok(config)
	}
}

fn validate_endpoint(url: &Url) -> Result<(), OAuthConfigError> {
	let loopback = match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	};

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		Ok(())
	} else {
		Err(OAuthConfigError::InsecureEndpoint { url: url.to_string() })
	}
}
