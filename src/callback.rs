//! Refresh notifications for logging, metrics, and audit hooks.

// self
use crate::{_prelude::*, token::Token};

/// Observer invoked after every refresh attempt.
///
/// Called outside the reuse layer's locks with:
///
/// - `(old, Some(new), None)` after a successful refresh;
/// - `(old, Some(new), Some(Error::Storage(..)))` when the refresh succeeded but persisting the
///   new token failed;
/// - `(old, None, Some(err))` when the refresh failed.
///
/// Implementations must not block for long; they run on the refreshing caller's task.
pub trait TokenCallback
where
	Self: Send + Sync,
{
	/// Receives one refresh event.
	fn notify(&self, old: Option<&Token>, new: Option<&Token>, error: Option<&Error>);
}

/// Adapts a closure into a [`TokenCallback`].
pub struct FnCallback<F>(F);
impl<F> FnCallback<F>
where
	F: Fn(Option<&Token>, Option<&Token>, Option<&Error>) + Send + Sync,
{
	/// Wraps the closure.
	pub fn new(f: F) -> Self {
		Self(f)
	}
}
impl<F> TokenCallback for FnCallback<F>
where
	F: Fn(Option<&Token>, Option<&Token>, Option<&Error>) + Send + Sync,
{
	fn notify(&self, old: Option<&Token>, new: Option<&Token>, error: Option<&Error>) {
		(self.0)(old, new, error)
	}
}
impl<F> Debug for FnCallback<F> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FnCallback(..)")
	}
}

/// Callback that logs every refresh event through `tracing`.
///
/// Tokens are identified by their fingerprint; secrets never reach the log. Without the
/// `tracing` feature the callback is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingCallback;
impl TokenCallback for TracingCallback {
	fn notify(&self, old: Option<&Token>, new: Option<&Token>, error: Option<&Error>) {
		#[cfg(feature = "tracing")]
		{
			let old = old.map(|token| token.access_token.fingerprint());

			match (new, error) {
				(Some(new), None) => tracing::info!(
					old = ?old,
					new = %new.access_token.fingerprint(),
					"Access token refreshed."
				),
				(Some(new), Some(err)) => tracing::warn!(
					old = ?old,
					new = %new.access_token.fingerprint(),
					error = %err,
					"Refreshed access token was not persisted."
				),
				(None, err) => tracing::error!(
					old = ?old,
					error = ?err.map(ToString::to_string),
					"Access token refresh failed."
				),
			}
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (old, new, error);
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn fn_callback_forwards_every_argument() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let callback = FnCallback::new(
			move |old: Option<&Token>, new: Option<&Token>, err: Option<&Error>| {
				sink.lock().push((
					old.map(|token| token.access_token.expose().to_owned()),
					new.map(|token| token.access_token.expose().to_owned()),
					err.map(ToString::to_string),
				));
			},
		);
		let old = Token::bearer("old");
		let new = Token::bearer("new");
		let err = Error::from(StoreError::Backend { message: "disk full".into() });

		callback.notify(Some(&old), Some(&new), None);
		callback.notify(Some(&old), Some(&new), Some(&err));

		let seen = seen.lock();

		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0], (Some("old".into()), Some("new".into()), None));
		assert!(seen[1].2.as_deref().is_some_and(|message| message.contains("disk full")));
	}

	#[test]
	fn tracing_callback_accepts_every_event_shape() {
		let token = Token::bearer("secret");
		let err = Error::Revoked;

		TracingCallback.notify(None, Some(&token), None);
		TracingCallback.notify(Some(&token), Some(&token), Some(&err));
		TracingCallback.notify(Some(&token), None, Some(&err));
	}
}
