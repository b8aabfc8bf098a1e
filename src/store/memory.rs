//! Thread-safe in-memory [`TokenStore`], the default backend for auto-renewal.

// self
use crate::{
	_prelude::*,
	store::{StoreError, StoreFuture, TokenStore},
	token::Token,
};

type Slot = Arc<RwLock<Option<Token>>>;

/// Keeps the token in-process; clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Slot);
impl MemoryStore {
	/// Creates a store pre-seeded with `token`.
	pub fn with_token(token: Token) -> Self {
		Self(Arc::new(RwLock::new(Some(token))))
	}

	/// Returns the currently stored token without going through the async contract.
	pub fn snapshot(&self) -> Option<Token> {
		self.0.read().clone()
	}

	fn save_now(slot: Slot, token: Token) -> Result<(), StoreError> {
		*slot.write() = Some(token);

		Ok(())
	}
}
impl TokenStore for MemoryStore {
	fn load(&self) -> StoreFuture<'_, Option<Token>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone()) })
	}

	fn save(&self, token: Token) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move { Self::save_now(slot, token) })
	}
}
