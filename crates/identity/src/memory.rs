use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use carebase_primitives::{Credentials, Session, SessionEvent, SubjectId};
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::{AuthError, IdentityProvider, Result};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
struct Account {
	subject_id: SubjectId,
	password: String,
}

struct Inner {
	accounts: Mutex<HashMap<String, Account>>,
	current: Mutex<Option<Session>>,
	reachable: AtomicBool,
	session_ttl: TimeDelta,
	events: broadcast::Sender<SessionEvent>,
}

/// In-process identity provider.
///
/// Accounts are keyed by email. Every transition is broadcast to subscribers
/// in the order it happens, like a hosted provider's auth-state stream.
#[derive(Clone)]
pub struct MemoryIdentityProvider {
	inner: Arc<Inner>,
}

impl Default for MemoryIdentityProvider {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryIdentityProvider {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			inner: Arc::new(Inner {
				accounts: Mutex::new(HashMap::new()),
				current: Mutex::new(None),
				reachable: AtomicBool::new(true),
				session_ttl: TimeDelta::hours(1),
				events,
			}),
		}
	}

	/// Registers an account for `email` owned by `subject_id`.
	#[must_use]
	pub fn with_account(self, email: &str, password: &str, subject_id: impl Into<SubjectId>) -> Self {
		self.inner.accounts.lock().insert(
			email.to_owned(),
			Account {
				subject_id: subject_id.into(),
				password: password.to_owned(),
			},
		);
		self
	}

	/// Restores a session for `email` without broadcasting, as if it had been
	/// persisted by an earlier run.
	pub fn restore_session(&self, email: &str) -> Result<Session> {
		let account = self.inner.accounts.lock().get(email).cloned().ok_or(AuthError::InvalidCredentials)?;
		let session = self.issue(email, &account);
		*self.inner.current.lock() = Some(session.clone());
		Ok(session)
	}

	/// Ends the current session as if its token had expired.
	pub fn expire_session(&self) {
		let ended = self.inner.current.lock().take();
		if let Some(session) = ended {
			tracing::debug!(subject = %session.subject_id, "identity.session.expired");
			self.publish(SessionEvent::signed_out());
		}
	}

	/// Toggles whether calls reach the provider. Unreachable calls fail with
	/// [`AuthError::Unreachable`].
	pub fn set_reachable(&self, reachable: bool) {
		self.inner.reachable.store(reachable, Ordering::Release);
	}

	/// Pushes an event to subscribers without changing the current session.
	pub fn publish(&self, event: SessionEvent) {
		// No subscribers is fine; the next subscriber reads the current session.
		let _ = self.inner.events.send(event);
	}

	fn ensure_reachable(&self) -> Result<()> {
		if self.inner.reachable.load(Ordering::Acquire) {
			Ok(())
		} else {
			Err(AuthError::Unreachable("memory provider offline".into()))
		}
	}

	fn issue(&self, email: &str, account: &Account) -> Session {
		Session {
			access_token: uuid::Uuid::new_v4().to_string(),
			subject_id: account.subject_id.clone(),
			email: Some(email.to_owned()),
			expires_at: Some(Utc::now() + self.inner.session_ttl),
		}
	}

	fn start_session(&self, email: &str, account: &Account) -> Session {
		let session = self.issue(email, account);
		*self.inner.current.lock() = Some(session.clone());
		tracing::debug!(subject = %session.subject_id, "identity.session.started");
		self.publish(SessionEvent::signed_in(session.clone()));
		session
	}
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
	async fn current_session(&self) -> Result<Option<Session>> {
		self.ensure_reachable()?;
		let mut current = self.inner.current.lock();
		if current.as_ref().is_some_and(|s| s.is_expired_at(Utc::now())) {
			*current = None;
		}
		Ok(current.clone())
	}

	fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
		self.ensure_reachable()?;
		let account = self.inner.accounts.lock().get(&credentials.email).cloned();
		match account {
			Some(account) if account.password == credentials.password => Ok(self.start_session(&credentials.email, &account)),
			_ => Err(AuthError::InvalidCredentials),
		}
	}

	async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
		self.ensure_reachable()?;
		let account = {
			let mut accounts = self.inner.accounts.lock();
			if accounts.contains_key(&credentials.email) {
				return Err(AuthError::AccountExists(credentials.email.clone()));
			}
			let account = Account {
				subject_id: SubjectId::random(),
				password: credentials.password.clone(),
			};
			accounts.insert(credentials.email.clone(), account.clone());
			account
		};
		Ok(self.start_session(&credentials.email, &account))
	}

	async fn sign_out(&self) -> Result<()> {
		self.ensure_reachable()?;
		let ended = self.inner.current.lock().take();
		if ended.is_some() {
			self.publish(SessionEvent::signed_out());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use carebase_primitives::SessionEventKind;

	use super::*;

	fn provider() -> MemoryIdentityProvider {
		MemoryIdentityProvider::new().with_account("ada@example.com", "pw", "sub-ada")
	}

	#[tokio::test]
	async fn sign_in_broadcasts_and_sets_current_session() {
		let provider = provider();
		let mut events = provider.subscribe();

		let session = provider.sign_in(&Credentials::new("ada@example.com", "pw")).await.unwrap();
		assert_eq!(session.subject_id, SubjectId::new("sub-ada"));
		assert_eq!(provider.current_session().await.unwrap(), Some(session.clone()));

		let event = events.recv().await.unwrap();
		assert_eq!(event.kind, SessionEventKind::SignedIn);
		assert_eq!(event.session, Some(session));
		assert!(!event.initial);
	}

	#[tokio::test]
	async fn wrong_password_is_rejected_without_events() {
		let provider = provider();
		let mut events = provider.subscribe();
		let err = provider.sign_in(&Credentials::new("ada@example.com", "nope")).await.unwrap_err();
		assert_eq!(err, AuthError::InvalidCredentials);
		assert!(events.try_recv().is_err());
	}

	#[tokio::test]
	async fn sign_up_creates_account_and_signs_in() {
		let provider = provider();
		let creds = Credentials::new("new@example.com", "pw2");
		let session = provider.sign_up(&creds).await.unwrap();
		assert_eq!(session.email.as_deref(), Some("new@example.com"));

		let err = provider.sign_up(&creds).await.unwrap_err();
		assert_eq!(err, AuthError::AccountExists("new@example.com".into()));
	}

	#[tokio::test]
	async fn sign_out_and_expiry_broadcast_signed_out_once() {
		let provider = provider();
		provider.sign_in(&Credentials::new("ada@example.com", "pw")).await.unwrap();
		let mut events = provider.subscribe();

		provider.sign_out().await.unwrap();
		provider.sign_out().await.unwrap();
		assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::SignedOut);
		assert!(events.try_recv().is_err());

		provider.restore_session("ada@example.com").unwrap();
		provider.expire_session();
		assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::SignedOut);
		assert_eq!(provider.current_session().await.unwrap(), None);
	}

	#[tokio::test]
	async fn unreachable_provider_fails_every_call() {
		let provider = provider();
		provider.set_reachable(false);
		assert!(matches!(provider.current_session().await, Err(AuthError::Unreachable(_))));
		assert!(matches!(
			provider.sign_in(&Credentials::new("ada@example.com", "pw")).await,
			Err(AuthError::Unreachable(_))
		));
	}
}
