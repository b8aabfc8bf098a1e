//! Self-renewing OAuth 2.0 bearer transport for API clients: single-flight token refresh,
//! pluggable token stores, refresh callbacks, and idempotent client wrapping.
//!
//! The crate exposes two narrow contracts to the rest of an API client:
//!
//! - "give me a currently valid token" via [`client::Client::obtain_token`] or
//!   [`reuse::ReuseTokenSource::token`];
//! - "wrap my transport so requests are auto-authorized" via [`client::Client::wrap_transport`]
//!   and [`transport::AuthenticatedTransport`].
//!
//! Cancellation follows Rust future semantics: dropping a waiting caller stops it from waiting
//! without affecting other callers, and deadlines are applied by wrapping the returned future
//! (for example with `tokio::time::timeout`).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod callback;
pub mod client;
pub mod error;
pub mod http;
pub mod obs;
pub mod reuse;
pub mod source;
pub mod store;
pub mod token;
pub mod transport;

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use oauth2;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
