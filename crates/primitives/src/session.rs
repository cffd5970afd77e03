use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SubjectId;

/// Identity-provider session. Owned by the provider; the engine only reads it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	pub access_token: String,
	pub subject_id: SubjectId,
	pub email: Option<String>,
	pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("access_token", &"<redacted>")
			.field("subject_id", &self.subject_id)
			.field("email", &self.email)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
	SignedIn,
	SignedOut,
}

/// One session transition as delivered by the session watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
	pub kind: SessionEventKind,
	pub session: Option<Session>,
	/// Synthetic event describing the session that existed when watching began
	/// (or after a resync), rather than one pushed by the provider.
	pub initial: bool,
}

impl SessionEvent {
	pub fn signed_in(session: Session) -> Self {
		Self {
			kind: SessionEventKind::SignedIn,
			session: Some(session),
			initial: false,
		}
	}

	pub fn signed_out() -> Self {
		Self {
			kind: SessionEventKind::SignedOut,
			session: None,
			initial: false,
		}
	}

	/// Synthetic snapshot event for whatever session currently exists.
	pub fn snapshot(session: Option<Session>) -> Self {
		let kind = if session.is_some() { SessionEventKind::SignedIn } else { SessionEventKind::SignedOut };
		Self { kind, session, initial: true }
	}
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
	pub email: String,
	pub password: String,
}

impl Credentials {
	pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			email: email.into(),
			password: password.into(),
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials").field("email", &self.email).field("password", &"<redacted>").finish()
	}
}

/// Auth request forwarded to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
	SignIn(Credentials),
	SignUp(Credentials),
	SignOut,
}

impl AuthAction {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::SignIn(_) => "sign_in",
			Self::SignUp(_) => "sign_up",
			Self::SignOut => "sign_out",
		}
	}
}
