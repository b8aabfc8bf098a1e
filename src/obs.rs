//! Optional observability helpers for token renewal.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oauth2_autorenew.flow` with the `flow`
//!   and `stage` (call site) fields, plus leveled events for refreshes, store failures and
//!   401 retries.
//! - Enable `metrics` to increment the `oauth2_autorenew_flow_total` counter for every recorded
//!   outcome, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

pub(crate) use self::tracing::event;

// self
use crate::_prelude::*;

/// Renewal stages observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// One `grant_type=refresh_token` exchange with the token endpoint.
	Exchange,
	/// Cache lookup plus single-flight refresh in the reuse source.
	Refresh,
	/// Authorized API request sent through the authentication layer.
	Request,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Exchange => "exchange",
			FlowKind::Refresh => "refresh",
			FlowKind::Request => "request",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Result served from the cache or from another caller's refresh.
	Reused,
	/// Request replayed after the server rejected its token.
	Retry,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
			FlowOutcome::Reused => "reused",
			FlowOutcome::Retry => "retry",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
