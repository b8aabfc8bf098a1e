//! Token source contract and built-in sources.
//!
//! A [`TokenSource`] performs the actual exchange with the authorization server. It does no
//! caching and gives no concurrency guarantees; [`ReuseTokenSource`](crate::reuse::ReuseTokenSource)
//! layers caching and single-flight coordination on top of any source.

pub mod config;
pub mod refresh;
pub mod strategy;

pub use config::*;
pub use refresh::*;
pub use strategy::*;

// self
use crate::{_prelude::*, token::Token};

/// Boxed future returned by [`TokenSource::token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<Token>> + 'a + Send>>;

/// Produces tokens, typically through one network round-trip per call.
pub trait TokenSource
where
	Self: Send + Sync,
{
	/// Obtains a token.
	fn token(&self) -> TokenFuture<'_>;
}

/// Source that always returns the same token.
///
/// Installed by [`Client::with_oauth`](crate::client::Client::with_oauth) until auto-renewal is
/// enabled; once the token expires it keeps being returned and the server's 401 is passed back
/// to the caller.
#[derive(Clone, Debug)]
pub struct StaticTokenSource(Token);
impl StaticTokenSource {
	/// Wraps the token.
	pub fn new(token: Token) -> Self {
		Self(token)
	}
}
impl TokenSource for StaticTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		let token = self.0.clone();

		Box::pin(async move { Ok(token) })
	}
}
