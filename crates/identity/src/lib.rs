//! Identity provider contract and the session watcher.

use std::sync::Arc;

use async_trait::async_trait;
use carebase_primitives::{Credentials, Session, SessionEvent};
use thiserror::Error;
use tokio::sync::broadcast;

mod memory;
mod watcher;

pub use memory::MemoryIdentityProvider;
pub use watcher::{SessionWatcher, WatchItem};

/// Errors reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
	#[error("invalid email or password")]
	InvalidCredentials,

	#[error("an account for {0} already exists")]
	AccountExists(String),

	/// The provider could not be reached or returned garbage.
	#[error("identity provider unreachable: {0}")]
	Unreachable(String),

	/// The provider's event stream ended.
	#[error("identity provider event stream closed")]
	Closed,
}

/// Result type for identity provider operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// External identity provider.
///
/// Implementations broadcast a [`SessionEvent`] for every sign-in, sign-out,
/// and expiry, in the order they happen.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
	/// The session that exists right now, if any.
	async fn current_session(&self) -> Result<Option<Session>>;

	/// Subscribes to provider-pushed session events.
	fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

	async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

	/// Creates an account and signs it in.
	async fn sign_up(&self, credentials: &Credentials) -> Result<Session>;

	async fn sign_out(&self) -> Result<()>;
}

/// Shared handle to an identity provider.
pub type SharedProvider = Arc<dyn IdentityProvider>;
