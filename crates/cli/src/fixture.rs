//! TOML fixture describing the in-memory collaborators a demo run starts with.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, bail};
use carebase_identity::MemoryIdentityProvider;
use carebase_primitives::Record;
use carebase_store::MemoryStore;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
	pub email: String,
	pub password: String,
	pub subject_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
	pub accounts: Vec<Account>,
	/// Email of an account already signed in when the engine starts.
	pub session: Option<String>,
	pub tables: HashMap<String, Vec<Record>>,
}

impl Fixture {
	pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
		let fixture: Self = toml::from_str(input).context("parsing fixture")?;
		fixture.validate()?;
		Ok(fixture)
	}

	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let content = std::fs::read_to_string(path).with_context(|| format!("reading fixture {}", path.display()))?;
		Self::from_toml_str(&content).with_context(|| format!("loading fixture {}", path.display()))
	}

	fn validate(&self) -> anyhow::Result<()> {
		let mut seen = HashSet::new();
		for account in &self.accounts {
			if !seen.insert(account.email.as_str()) {
				bail!("duplicate account {:?}", account.email);
			}
		}
		if let Some(email) = &self.session
			&& !seen.contains(email.as_str())
		{
			bail!("session refers to unknown account {email:?}");
		}
		Ok(())
	}

	pub fn store(&self) -> MemoryStore {
		MemoryStore::from_tables(self.tables.clone())
	}

	/// Provider holding every fixture account, with the fixture session restored.
	pub fn provider(&self) -> anyhow::Result<MemoryIdentityProvider> {
		let provider = self.accounts.iter().fold(MemoryIdentityProvider::new(), |provider, account| {
			provider.with_account(&account.email, &account.password, account.subject_id.as_str())
		});
		if let Some(email) = &self.session {
			provider.restore_session(email).with_context(|| format!("restoring session for {email}"))?;
		}
		Ok(provider)
	}
}

#[cfg(test)]
mod tests {
	use carebase_identity::IdentityProvider;
	use carebase_primitives::Query;
	use carebase_store::RecordStore;

	use super::*;

	const DEMO: &str = include_str!("../fixtures/demo.toml");

	#[test]
	fn demo_fixture_parses() {
		let fixture = Fixture::from_toml_str(DEMO).unwrap();
		assert!(fixture.accounts.iter().any(|a| a.email == "admin@example.com"));
		assert!(fixture.tables.contains_key("staff_profiles"));
		assert!(fixture.tables.contains_key("parent_profiles"));
		assert_eq!(fixture.session, None);
	}

	#[test]
	fn session_must_name_an_account() {
		let err = Fixture::from_toml_str("session = \"ghost@example.com\"").unwrap_err();
		assert!(err.to_string().contains("ghost@example.com"), "{err:#}");
	}

	#[test]
	fn duplicate_accounts_are_rejected() {
		let input = r#"
[[accounts]]
email = "a@example.com"
password = "x"
subject_id = "s-1"

[[accounts]]
email = "a@example.com"
password = "y"
subject_id = "s-2"
"#;
		assert!(Fixture::from_toml_str(input).is_err());
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(Fixture::from_toml_str("acounts = []").is_err());
	}

	#[tokio::test]
	async fn collaborators_are_populated_from_the_fixture() {
		let input = r#"
session = "p@example.com"

[[accounts]]
email = "p@example.com"
password = "pw"
subject_id = "sub-p"

[[tables.children]]
id = "c-1"
last_name = "Lovelace"
age = 4
"#;
		let fixture = Fixture::from_toml_str(input).unwrap();

		let rows = fixture.store().query(&Query::table("children")).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].get_str("last_name"), Some("Lovelace"));
		assert_eq!(rows[0].get("age").and_then(|v| v.as_i64()), Some(4));

		let session = fixture.provider().unwrap().current_session().await.unwrap().unwrap();
		assert_eq!(session.subject_id.as_str(), "sub-p");
	}

	#[test]
	fn load_reports_the_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("broken.toml");
		std::fs::write(&path, "accounts = 3").unwrap();
		let err = Fixture::load(&path).unwrap_err();
		assert!(format!("{err:#}").contains("broken.toml"));
	}
}
