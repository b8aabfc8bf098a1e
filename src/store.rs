//! Storage contracts and built-in token store implementations.
//!
//! A store persists exactly one [`Token`] per client. The reuse layer loads it once when a
//! [`ReuseTokenSource`](crate::reuse::ReuseTokenSource) is built and saves it after every
//! successful refresh; save failures never fail a request.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, token::Token};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract implemented by token stores (memory, file, secret manager, ...).
///
/// Stores define where a token lives, not how it is protected; encrypting at rest is the
/// implementation's concern.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Loads the persisted token, returning `None` when nothing was saved yet.
	fn load(&self) -> StoreFuture<'_, Option<Token>>;

	/// Persists or replaces the token.
	fn save(&self, token: Token) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
