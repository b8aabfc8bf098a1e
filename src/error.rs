//! Crate-level error types shared by token sources, stores, transports, and the client wrapper.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure; never fatal to the request path.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration or composition problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Shared outcome of a failed refresh cycle.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// Temporary upstream failure; retry on the next refresh trigger.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Requested scopes exceed what was granted.
	#[error("Token lacks the required scopes: {reason}.")]
	InsufficientScope {
		/// Provider- or client-supplied reason string.
		reason: String,
	},
	/// Provider rejected the grant (e.g., a rotated or expired refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider- or client-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or client-supplied reason string.
		reason: String,
	},
	/// Token has been revoked and must not be reused.
	#[error("Token has been revoked.")]
	Revoked,
}
impl Error {
	/// Classifies the error for refresh scheduling.
	///
	/// Terminal errors will keep failing until credentials change, so a cool-down is applied
	/// before the next exchange. Everything else is retried on the next natural trigger.
	pub fn refresh_kind(&self) -> RefreshErrorKind {
		match self {
			Self::InvalidGrant { .. }
			| Self::InvalidClient { .. }
			| Self::InsufficientScope { .. }
			| Self::Revoked
			| Self::Config(_) => RefreshErrorKind::Terminal,
			Self::Refresh(err) => err.kind(),
			Self::Storage(_) | Self::Transient(_) | Self::Transport(_) =>
				RefreshErrorKind::Transient,
		}
	}

	/// Returns `true` when the error is terminal for refresh purposes.
	pub fn is_terminal(&self) -> bool {
		matches!(self.refresh_kind(), RefreshErrorKind::Terminal)
	}
}

/// Configuration and validation failures raised synchronously at composition time.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Auto-renewal was requested before OAuth was configured.
	#[error("Auto-renewal requires OAuth to be configured first.")]
	AutoRenewalWithoutOAuth,
	/// A token was requested from a client without OAuth.
	#[error("OAuth is not configured on this client.")]
	OAuthNotConfigured,
	/// The supplied token carries neither an access token nor a refresh token.
	#[error("Token must carry an access token or a refresh token.")]
	EmptyToken,
	/// OAuth client configuration failed validation.
	#[error(transparent)]
	InvalidOAuthConfig(#[from] crate::source::OAuthConfigError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Token endpoint URL is invalid.
	#[error("Token endpoint URL is invalid.")]
	InvalidTokenUrl {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// The token cannot be rendered as an `Authorization` header value.
	#[error("Token cannot be encoded as an Authorization header.")]
	InvalidAuthorizationHeader {
		/// Underlying header validation failure.
		#[source]
		source: oauth2::http::header::InvalidHeaderValue,
	},
	/// Cached token is missing a refresh secret.
	#[error("Token is missing a refresh token.")]
	MissingRefreshToken,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Refresh failure classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshErrorKind {
	/// Network or 5xx-class failure; retried on the next natural refresh trigger.
	Transient,
	/// Invalid-grant-class failure; a cool-down applies before the next exchange.
	Terminal,
}
impl RefreshErrorKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Transient => "transient",
			Self::Terminal => "terminal",
		}
	}
}
impl Display for RefreshErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome of a failed refresh cycle, shared verbatim with every caller that waited on it.
///
/// Cloning is cheap and preserves identity: all clones point at the same underlying cause, so
/// callers can check that they observed the same cycle via [`RefreshError::same_cycle`].
#[derive(Clone, Debug, ThisError)]
#[error("Token refresh failed ({kind}): {cause}")]
pub struct RefreshError {
	kind: RefreshErrorKind,
	#[source]
	cause: Arc<Error>,
}
impl RefreshError {
	/// Wraps the error returned by a token source, classifying it.
	pub fn new(cause: Error) -> Self {
		Self { kind: cause.refresh_kind(), cause: Arc::new(cause) }
	}

	/// Builds the error raised when a source hands back a token without an access token.
	pub fn empty_access_token() -> Self {
		Self::new(
			TransientError::TokenEndpoint {
				message: "Token source returned an empty access token.".into(),
				status: None,
				retry_after: None,
			}
			.into(),
		)
	}

	/// Classification of the failure.
	pub fn kind(&self) -> RefreshErrorKind {
		self.kind
	}

	/// Returns `true` for invalid-grant-class failures.
	pub fn is_terminal(&self) -> bool {
		matches!(self.kind, RefreshErrorKind::Terminal)
	}

	/// Underlying error reported by the token source.
	pub fn cause(&self) -> &Error {
		&self.cause
	}

	/// Returns `true` when both errors originate from the same refresh attempt.
	pub fn same_cycle(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.cause, &other.cause)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}")]
	TokenEndpoint {
		/// Provider- or client-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
