//! Client-side scoping of fetched collections.

use carebase_primitives::{Collection, Record, ResolvedIdentity};

/// Keeps only the records that belong to the parent `identity`: rows whose
/// `parent_id` equals the parent's profile id. An identity without a profile
/// id owns nothing.
pub fn for_parent(identity: &ResolvedIdentity, records: &[Record]) -> Collection {
	let Some(profile_id) = identity.profile_id.as_ref() else {
		return Collection::new();
	};
	records.iter().filter(|r| r.get_str("parent_id") == Some(profile_id.as_str())).cloned().collect()
}

#[cfg(test)]
mod tests {
	use carebase_primitives::RecordId;

	use super::*;

	#[test]
	fn keeps_only_own_rows() {
		let rows = vec![
			Record::new().with("id", "i1").with("parent_id", "p-1"),
			Record::new().with("id", "i2").with("parent_id", "p-2"),
			Record::new().with("id", "i3"),
		];
		let scoped = for_parent(&ResolvedIdentity::parent(RecordId::new("p-1"), "Pat"), &rows);
		assert_eq!(scoped.len(), 1);
		assert_eq!(scoped[0].id(), Some("i1"));

		assert!(for_parent(&ResolvedIdentity::unknown("nobody"), &rows).is_empty());
	}
}
