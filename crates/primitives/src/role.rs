use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::RecordId;

/// Operating role of the signed-in user.
///
/// `SignedOut` is the "auth" pseudo-role used when there is no session at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Admin,
	Teacher,
	Assistant,
	Parent,
	/// Signed in, but neither profile lookup matched.
	Unknown,
	#[serde(rename = "auth")]
	SignedOut,
}

/// Staff role string that is not one of the staff-family roles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized staff role: {0:?}")]
pub struct RoleParseError(pub String);

impl Role {
	pub const ALL: [Role; 6] = [Role::Admin, Role::Teacher, Role::Assistant, Role::Parent, Role::Unknown, Role::SignedOut];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Admin => "admin",
			Self::Teacher => "teacher",
			Self::Assistant => "assistant",
			Self::Parent => "parent",
			Self::Unknown => "unknown",
			Self::SignedOut => "auth",
		}
	}

	/// Parses the `role` column of a staff profile, case- and whitespace-insensitively.
	pub fn parse_staff(raw: &str) -> Result<Self, RoleParseError> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"admin" => Ok(Self::Admin),
			"teacher" => Ok(Self::Teacher),
			"assistant" => Ok(Self::Assistant),
			_ => Err(RoleParseError(raw.to_owned())),
		}
	}

	/// Admin, teacher, or assistant.
	pub const fn is_staff(self) -> bool {
		matches!(self, Self::Admin | Self::Teacher | Self::Assistant)
	}

	/// True for roles that were matched against a profile row.
	pub const fn is_resolved(self) -> bool {
		matches!(self, Self::Admin | Self::Teacher | Self::Assistant | Self::Parent)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Result of resolving a raw session into exactly one operating role.
///
/// Replaced atomically on every session transition; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedIdentity {
	pub role: Role,
	/// Id of the matched profile row, staff or parent.
	pub profile_id: Option<RecordId>,
	/// Id of the matched staff row. Always `None` for parents.
	pub staff_id: Option<RecordId>,
	pub display_name: String,
}

impl ResolvedIdentity {
	pub fn signed_out() -> Self {
		Self {
			role: Role::SignedOut,
			profile_id: None,
			staff_id: None,
			display_name: String::new(),
		}
	}

	pub fn unknown(display_name: impl Into<String>) -> Self {
		Self {
			role: Role::Unknown,
			profile_id: None,
			staff_id: None,
			display_name: display_name.into(),
		}
	}

	/// Identity for a matched staff profile. `role` must be a staff-family role.
	pub fn staff(role: Role, staff_id: RecordId, display_name: impl Into<String>) -> Self {
		debug_assert!(role.is_staff(), "staff identity built with non-staff role {role}");
		Self {
			role,
			profile_id: Some(staff_id.clone()),
			staff_id: Some(staff_id),
			display_name: display_name.into(),
		}
	}

	pub fn parent(profile_id: RecordId, display_name: impl Into<String>) -> Self {
		Self {
			role: Role::Parent,
			profile_id: Some(profile_id),
			staff_id: None,
			display_name: display_name.into(),
		}
	}

	pub fn is_signed_out(&self) -> bool {
		self.role == Role::SignedOut
	}
}

impl Default for ResolvedIdentity {
	fn default() -> Self {
		Self::signed_out()
	}
}
