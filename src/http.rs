//! Transport primitives shared by API requests and token exchanges.
//!
//! [`HttpTransport`] is the crate's only dependency on an HTTP stack: one buffered request in,
//! one buffered response out. Decorators such as
//! [`AuthenticatedTransport`](crate::transport::AuthenticatedTransport) implement the same trait
//! and expose the transport they wrap through [`HttpTransport::inner`], which is what lets the
//! client wrapper detect an existing layer instead of stacking a second one.

pub use oauth2::{HttpRequest, HttpResponse};

// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError,
	http::{HeaderMap, header::RETRY_AFTER},
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, transport::AuthenticatedTransport};

/// Boxed future returned by [`HttpTransport::round_trip`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse>> + 'a + Send>>;

/// Sends one HTTP request and returns one HTTP response.
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by every
/// clone of a client. Non-2xx statuses are responses, not errors; only failures to obtain a
/// response surface as `Err`.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends the request.
	fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_>;

	/// Transport wrapped by this one, if it is a decorator.
	fn inner(&self) -> Option<Arc<dyn HttpTransport>> {
		None
	}

	/// Marker check for the authorization layer; only
	/// [`AuthenticatedTransport`] overrides it.
	fn authenticated(&self) -> Option<AuthenticatedTransport> {
		None
	}
}

/// Walks the decorator chain starting at `transport` and returns the innermost transport.
pub fn innermost(transport: &Arc<dyn HttpTransport>) -> Arc<dyn HttpTransport> {
	let mut current = Arc::clone(transport);

	while let Some(next) = current.inner() {
		current = next;
	}

	current
}

/// Returns the first authorization layer found in the decorator chain.
pub fn find_authenticated(transport: &Arc<dyn HttpTransport>) -> Option<AuthenticatedTransport> {
	let mut current = Some(Arc::clone(transport));

	while let Some(layer) = current {
		if let Some(found) = layer.authenticated() {
			return Some(found);
		}

		current = layer.inner();
	}

	None
}

/// Counts the authorization layers in the decorator chain.
pub fn authenticated_depth(transport: &Arc<dyn HttpTransport>) -> usize {
	let mut current = Some(Arc::clone(transport));
	let mut depth = 0;

	while let Some(layer) = current {
		if layer.authenticated().is_some() {
			depth += 1;
		}

		current = layer.inner();
	}

	depth
}

/// Copies a buffered request so it can be replayed.
///
/// Request extensions are not carried over.
pub fn duplicate_request(request: &HttpRequest) -> HttpRequest {
	let mut copy = HttpRequest::new(request.body().clone());

	*copy.method_mut() = request.method().clone();
	*copy.uri_mut() = request.uri().clone();
	*copy.version_mut() = request.version();
	*copy.headers_mut() = request.headers().clone();

	copy
}

/// Captures metadata from the most recent token endpoint response for error classification.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the token endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Adapter letting the `oauth2` crate send token exchanges through any [`HttpTransport`].
pub(crate) struct TokenEndpointClient {
	transport: Arc<dyn HttpTransport>,
	slot: ResponseMetadataSlot,
}
impl TokenEndpointClient {
	pub(crate) fn new(transport: Arc<dyn HttpTransport>, slot: ResponseMetadataSlot) -> Self {
		Self { transport, slot }
	}
}
impl<'c> AsyncHttpClient<'c> for TokenEndpointClient {
	type Error = HttpClientError<Error>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let response = self.transport.round_trip(request).await.map_err(Box::new)?;
			let retry_after = parse_retry_after(response.headers());

			self.slot
				.store(ResponseMetadata { status: Some(response.status().as_u16()), retry_after });

			Ok(response)
		})
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`HttpTransport`].
///
/// Bodies are buffered in both directions so requests can be replayed after a 401.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let request =
				reqwest::Request::try_from(request).map_err(crate::error::ConfigError::from)?;
			let response = self
				.0
				.execute(request)
				.await
				.map_err(crate::error::TransportError::from)?;
			let status = response.status();
			let version = response.version();
			let headers = response.headers().to_owned();
			let body = response.bytes().await.map_err(crate::error::TransportError::from)?;
			let mut converted = HttpResponse::new(body.to_vec());

			*converted.status_mut() = status;
			*converted.version_mut() = version;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::{HeaderValue, Method, header::AUTHORIZATION};
	// self
	use super::*;

	struct Echo;
	impl HttpTransport for Echo {
		fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
			Box::pin(async move { Ok(HttpResponse::new(request.into_body())) })
		}
	}

	struct Passthrough(Arc<dyn HttpTransport>);
	impl HttpTransport for Passthrough {
		fn round_trip(&self, request: HttpRequest) -> TransportFuture<'_> {
			self.0.round_trip(request)
		}

		fn inner(&self) -> Option<Arc<dyn HttpTransport>> {
			Some(Arc::clone(&self.0))
		}
	}

	#[test]
	fn duplicate_request_preserves_method_uri_headers_and_body() {
		let mut request = HttpRequest::new(b"payload".to_vec());

		*request.method_mut() = Method::POST;
		*request.uri_mut() = "https://api.example.com/v1/items".parse().expect("URI should parse.");
		request.headers_mut().insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));

		let copy = duplicate_request(&request);

		assert_eq!(copy.method(), &Method::POST);
		assert_eq!(copy.uri(), request.uri());
		assert_eq!(copy.headers(), request.headers());
		assert_eq!(copy.body(), request.body());
	}

	#[test]
	fn innermost_follows_decorator_chain() {
		let base: Arc<dyn HttpTransport> = Arc::new(Echo);
		let wrapped: Arc<dyn HttpTransport> =
			Arc::new(Passthrough(Arc::new(Passthrough(Arc::clone(&base)))));

		assert!(Arc::ptr_eq(&innermost(&wrapped), &base));
		assert!(find_authenticated(&wrapped).is_none());
		assert_eq!(authenticated_depth(&wrapped), 0);
	}

	#[test]
	fn retry_after_accepts_delta_seconds() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(120)));
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}
}
