//! Error taxonomy of the sync engine.
//!
//! Only [`SessionError`] is fatal to a generation. Everything else is
//! contained at the component that produced it and reported through the
//! [`Notifier`](crate::Notifier).

use carebase_identity::AuthError;
use carebase_primitives::SubjectId;
use carebase_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// The identity provider could not produce a usable session. Forces the
/// signed-out state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
	#[error("identity provider failed: {0}")]
	Provider(#[from] AuthError),

	/// The provider delivered a session whose token had already expired.
	#[error("session for {subject} has expired")]
	Expired { subject: SubjectId },
}

/// A profile lookup failed. The previous identity is retained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
	#[error("profile lookup in {table} failed: {source}")]
	Lookup {
		table: &'static str,
		#[source]
		source: StoreError,
	},

	/// More than one profile row in one table claims the same subject.
	#[error("{rows} rows in {table} match subject {subject}")]
	Ambiguous {
		table: &'static str,
		subject: SubjectId,
		rows: usize,
	},

	/// The matching profile row has no `id` column.
	#[error("profile row in {table} has no id")]
	MissingId { table: &'static str },
}

/// One descriptor's fetch failed. The slice keeps its previous data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceFetchError {
	#[error("fetching {resource} failed: {source}")]
	Store {
		resource: String,
		#[source]
		source: StoreError,
	},

	#[error("fetching {resource} timed out after {after_ms}ms")]
	Timeout { resource: String, after_ms: u64 },

	/// The fetch's generation was superseded before it finished.
	#[error("fetching {resource} was cancelled")]
	Cancelled { resource: String },

	#[error("fetching {resource} panicked: {message}")]
	Panicked { resource: String, message: String },
}

impl ResourceFetchError {
	pub fn resource(&self) -> &str {
		match self {
			Self::Store { resource, .. } | Self::Timeout { resource, .. } | Self::Cancelled { resource } | Self::Panicked { resource, .. } => {
				resource
			}
		}
	}
}

/// The write half of a mutation failed; nothing was refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
	#[error("write for {resource} failed: {source}")]
	Write {
		resource: String,
		#[source]
		source: StoreError,
	},

	/// The named resource is not part of the current role's plan.
	#[error("{resource} is not loaded for the current role")]
	NotInPlan { resource: String },
}

/// The refresh after a successful write failed. The write stands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
	#[error(transparent)]
	Fetch(#[from] ResourceFetchError),

	/// The coalescing gate lost the refresh job.
	#[error("refresh of {resource} was lost: {reason}")]
	Lost { resource: String, reason: String },
}

/// Umbrella error for callers that handle every engine failure the same way.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error(transparent)]
	Session(#[from] SessionError),

	#[error(transparent)]
	Resolution(#[from] ResolutionError),

	#[error(transparent)]
	Fetch(#[from] ResourceFetchError),

	#[error(transparent)]
	Mutation(#[from] MutationError),

	#[error(transparent)]
	Refresh(#[from] RefreshError),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fetch_errors_name_their_resource() {
		let err = ResourceFetchError::Timeout {
			resource: "attendance".into(),
			after_ms: 50,
		};
		assert_eq!(err.resource(), "attendance");
		assert_eq!(err.to_string(), "fetching attendance timed out after 50ms");

		let refresh = RefreshError::from(err.clone());
		assert_eq!(refresh.to_string(), err.to_string());
	}

	#[test]
	fn umbrella_preserves_source_message() {
		let err = SyncError::from(ResolutionError::Lookup {
			table: "staff_profiles",
			source: StoreError::Unavailable("down".into()),
		});
		assert_eq!(err.to_string(), "profile lookup in staff_profiles failed: record store unavailable: down");
	}
}
