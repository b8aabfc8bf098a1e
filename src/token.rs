//! Immutable OAuth token snapshots, freshness helpers, and builders.

pub mod secret;

pub use secret::TokenSecret;

// crates.io
use time::PrimitiveDateTime;
// self
use crate::_prelude::*;

/// Immutable credential snapshot handed out by token sources.
///
/// A token without [`expires_at`](Self::expires_at) never expires from the client's point of
/// view and is only replaced after the server rejects it. A token whose access token is empty is
/// treated as absent and is never cached.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Token type as issued by the provider (usually `bearer`).
	#[serde(default)]
	pub token_type: String,
	/// Absolute expiry instant, if the provider reported one.
	#[serde(default)]
	pub expires_at: Option<OffsetDateTime>,
	/// Scopes granted to the token, in the order the provider listed them.
	#[serde(default)]
	pub scope: Vec<String>,
}
impl Token {
	/// Returns a builder for assembling tokens.
	pub fn builder() -> TokenBuilder {
		TokenBuilder::default()
	}

	/// Shorthand for a bearer token carrying only an access token.
	pub fn bearer(access_token: impl Into<String>) -> Self {
		Self::builder().access_token(access_token).build()
	}

	/// Returns `true` when the token carries an access token that can be sent.
	pub fn is_usable(&self) -> bool {
		!self.access_token.is_empty()
	}

	/// Returns `true` if a refresh token is present and non-empty.
	pub fn has_refresh_token(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.is_empty())
	}

	/// Returns `true` if the token has an expiry at or before `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| instant >= expires_at)
	}

	/// Returns `true` if the token can be served from cache at `instant`.
	///
	/// Tokens without expiry are always fresh; otherwise the token must remain valid for longer
	/// than `skew`. A skew reaching past the earliest representable instant makes every expiring
	/// token stale.
	pub fn is_fresh_at(&self, instant: OffsetDateTime, skew: Duration) -> bool {
		if !self.is_usable() {
			return false;
		}

		match self.expires_at {
			Some(expires_at) =>
				expires_at.checked_sub(skew).is_some_and(|deadline| instant < deadline),
			None => true,
		}
	}

	/// Normalized token type used in the `Authorization` header.
	pub fn token_type(&self) -> &str {
		let raw = self.token_type.as_str();

		if raw.is_empty() || raw.eq_ignore_ascii_case("bearer") {
			"Bearer"
		} else if raw.eq_ignore_ascii_case("mac") {
			"MAC"
		} else if raw.eq_ignore_ascii_case("basic") {
			"Basic"
		} else {
			raw
		}
	}

	/// Renders the `Authorization` header value (`<Type> <AccessToken>`).
	pub fn authorization_value(&self) -> String {
		format!("{} {}", self.token_type(), self.access_token.expose())
	}

	/// Returns `true` when both tokens carry the same access token.
	pub fn same_access_token(&self, other: &Self) -> bool {
		self.access_token == other.access_token
	}
}
impl Debug for Token {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Token")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`Token`].
#[derive(Clone, Debug, Default)]
pub struct TokenBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	scope: Vec<String>,
}
impl TokenBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the token type (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the instant `expires_in` is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Appends a granted scope.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope.push(scope.into());

		self
	}

	/// Replaces the granted scopes.
	pub fn scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scope = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Consumes the builder and produces a [`Token`].
	///
	/// An absolute expiry wins over a relative one; without either the token never expires.
	pub fn build(self) -> Token {
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) =>
				Some(saturating_add(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc), delta)),
			(None, None) => None,
		};

		Token {
			access_token: self.access_token.unwrap_or_default(),
			refresh_token: self.refresh_token,
			token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
			expires_at,
			scope: self.scope,
		}
	}
}

/// Adds `delta` to `instant`, clamping at the representable range instead of overflowing.
pub(crate) fn saturating_add(instant: OffsetDateTime, delta: Duration) -> OffsetDateTime {
	instant.checked_add(delta).unwrap_or_else(|| {
		let bound =
			if delta.is_negative() { PrimitiveDateTime::MIN } else { PrimitiveDateTime::MAX };

		bound.assume_utc()
	})
}
