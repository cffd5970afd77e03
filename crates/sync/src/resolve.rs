//! Role resolution.
//!
//! A session is resolved by probing the staff and parent profile tables
//! concurrently. Both lookups always run to completion. A staff match wins
//! over a parent match; neither yields [`Role::Unknown`].

use carebase_primitives::{Query, Record, RecordId, ResolvedIdentity, Role, Session};
use carebase_store::SharedStore;

use crate::error::ResolutionError;

pub const STAFF_PROFILES: &str = "staff_profiles";
pub const PARENT_PROFILES: &str = "parent_profiles";

#[derive(Clone)]
pub struct RoleResolver {
	store: SharedStore,
}

impl RoleResolver {
	pub fn new(store: SharedStore) -> Self {
		Self { store }
	}

	/// Resolves `session` into exactly one identity.
	///
	/// No session resolves to signed-out without touching the store. A
	/// lookup error other than "no row found" fails the whole resolution.
	#[tracing::instrument(skip_all, fields(subject = session.map(|s| s.subject_id.as_str())))]
	pub async fn resolve(&self, session: Option<&Session>) -> Result<ResolvedIdentity, ResolutionError> {
		let Some(session) = session else {
			return Ok(ResolvedIdentity::signed_out());
		};

		let (staff, parent) = tokio::join!(self.lookup(STAFF_PROFILES, session), self.lookup(PARENT_PROFILES, session));
		let (staff, parent) = (staff?, parent?);

		let fallback_name = || session.email.clone().unwrap_or_else(|| session.subject_id.to_string());
		let identity = match (staff, parent) {
			(Some(staff), parent) => {
				if parent.is_some() {
					tracing::warn!(subject = %session.subject_id, "sync.resolve.both_profiles_match");
				}
				staff_identity(&staff, fallback_name)?
			}
			(None, Some(parent)) => {
				let id = row_id(&parent, PARENT_PROFILES)?;
				ResolvedIdentity::parent(id, display_name(&parent).unwrap_or_else(fallback_name))
			}
			(None, None) => ResolvedIdentity::unknown(fallback_name()),
		};
		tracing::debug!(role = %identity.role, "sync.resolve.done");
		Ok(identity)
	}

	/// Looks up the single row of `table` owned by `session`'s subject.
	async fn lookup(&self, table: &'static str, session: &Session) -> Result<Option<Record>, ResolutionError> {
		let query = Query::table(table).eq("subject_id", session.subject_id.as_str());
		let mut rows = match self.store.query(&query).await {
			Ok(rows) => rows,
			Err(err) if err.is_not_found() => return Ok(None),
			Err(source) => return Err(ResolutionError::Lookup { table, source }),
		};
		match rows.len() {
			0 => Ok(None),
			1 => Ok(rows.pop()),
			n => Err(ResolutionError::Ambiguous {
				table,
				subject: session.subject_id.clone(),
				rows: n,
			}),
		}
	}
}

fn staff_identity(row: &Record, fallback_name: impl FnOnce() -> String) -> Result<ResolvedIdentity, ResolutionError> {
	let raw_role = row.get_str("role").unwrap_or_default();
	let role = Role::parse_staff(raw_role).unwrap_or_else(|err| {
		tracing::warn!(error = %err, "sync.resolve.unrecognized_staff_role");
		Role::Assistant
	});
	let id = row_id(row, STAFF_PROFILES)?;
	Ok(ResolvedIdentity::staff(role, id, display_name(row).unwrap_or_else(fallback_name)))
}

fn row_id(row: &Record, table: &'static str) -> Result<RecordId, ResolutionError> {
	row.id().map(RecordId::from).ok_or(ResolutionError::MissingId { table })
}

fn display_name(row: &Record) -> Option<String> {
	row.get_str("name").map(str::to_owned)
}
