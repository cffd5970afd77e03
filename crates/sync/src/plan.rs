//! Resource catalog and the fetch plan builder.
//!
//! A plan is a pure function of a [`ResolvedIdentity`]: every resolved role
//! gets the baseline resources, staff-family roles add the operational
//! datasets, and each role layers its own on top. Building twice from the same
//! identity yields the same names and the same queries.

use std::fmt;
use std::sync::Arc;

use carebase_primitives::{BoxFutureStatic, Collection, Direction, Query, ResolvedIdentity, Role};
use carebase_store::{SharedStore, StoreError};
use indexmap::IndexMap;

/// Resource names known to the catalog.
pub mod names {
	pub const FACILITY: &str = "facility";
	pub const CLASSROOMS: &str = "classrooms";
	pub const ANNOUNCEMENTS: &str = "announcements";
	pub const CHILDREN: &str = "children";
	pub const ATTENDANCE: &str = "attendance";
	pub const INCIDENTS: &str = "incidents";
	pub const STAFF: &str = "staff";
	pub const INVOICES: &str = "invoices";
	pub const PAYROLL: &str = "payroll";
	pub const SCHEDULES: &str = "schedules";
	pub const LESSON_PLANS: &str = "lesson_plans";
	pub const BILLING: &str = "billing";
	pub const REPORTS: &str = "reports";
}

#[derive(Debug, Clone, Copy)]
enum Scope {
	Everything,
	/// Rows whose `staff_id` is the identity's staff id.
	OwnStaffRows,
}

/// One catalog row: a resource name and the fixed query behind it.
#[derive(Debug, Clone, Copy)]
struct Entry {
	name: &'static str,
	table: &'static str,
	order: (&'static str, Direction),
	scope: Scope,
}

const fn entry(name: &'static str, table: &'static str, field: &'static str, direction: Direction) -> Entry {
	Entry {
		name,
		table,
		order: (field, direction),
		scope: Scope::Everything,
	}
}

const BASELINE: &[Entry] = &[
	entry(names::FACILITY, "facility", "name", Direction::Asc),
	entry(names::CLASSROOMS, "classrooms", "name", Direction::Asc),
	entry(names::ANNOUNCEMENTS, "announcements", "created_at", Direction::Desc),
];

const STAFF_FAMILY: &[Entry] = &[
	entry(names::CHILDREN, "children", "last_name", Direction::Asc),
	entry(names::ATTENDANCE, "attendance", "date", Direction::Desc),
	entry(names::INCIDENTS, "incidents", "occurred_at", Direction::Desc),
];

const ADMIN: &[Entry] = &[
	entry(names::STAFF, "staff_profiles", "name", Direction::Asc),
	entry(names::INVOICES, "invoices", "due_date", Direction::Desc),
	entry(names::PAYROLL, "payroll", "period", Direction::Desc),
];

const TEACHER: &[Entry] = &[
	Entry {
		scope: Scope::OwnStaffRows,
		..entry(names::SCHEDULES, "schedules", "starts_at", Direction::Asc)
	},
	entry(names::LESSON_PLANS, "lesson_plans", "week", Direction::Desc),
];

const PARENT: &[Entry] = &[
	entry(names::BILLING, "invoices", "due_date", Direction::Desc),
	entry(names::REPORTS, "reports", "created_at", Direction::Desc),
];

/// Catalog groups contributing to `role`'s plan, in plan order.
fn groups(role: Role) -> &'static [&'static [Entry]] {
	match role {
		Role::Admin => &[BASELINE, STAFF_FAMILY, ADMIN],
		Role::Teacher => &[BASELINE, STAFF_FAMILY, TEACHER],
		Role::Assistant => &[BASELINE, STAFF_FAMILY],
		Role::Parent => &[BASELINE, PARENT],
		Role::Unknown | Role::SignedOut => &[],
	}
}

type FetchFn = Arc<dyn Fn() -> BoxFutureStatic<Result<Collection, StoreError>> + Send + Sync>;

/// A named, independently fetchable resource.
#[derive(Clone)]
pub struct ResourceDescriptor {
	name: String,
	query: Query,
	fetch: FetchFn,
}

impl ResourceDescriptor {
	/// Descriptor whose fetch is `store.query(&query)`.
	pub fn from_query(name: impl Into<String>, query: Query, store: SharedStore) -> Self {
		let captured = query.clone();
		Self {
			name: name.into(),
			query,
			fetch: Arc::new(move || {
				let store = Arc::clone(&store);
				let query = captured.clone();
				Box::pin(async move { store.query(&query).await })
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// The query this descriptor runs.
	pub fn query(&self) -> &Query {
		&self.query
	}

	/// Starts one fetch. The returned future owns everything it needs.
	pub fn fetch(&self) -> BoxFutureStatic<Result<Collection, StoreError>> {
		(self.fetch)()
	}
}

impl fmt::Debug for ResourceDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceDescriptor").field("name", &self.name).field("query", &self.query).finish()
	}
}

/// Ordered, name-unique set of descriptors for one resolved identity.
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
	role: Option<Role>,
	descriptors: IndexMap<String, ResourceDescriptor>,
}

impl FetchPlan {
	pub fn empty() -> Self {
		Self::default()
	}

	/// Role the plan was built for. `None` for [`FetchPlan::empty`].
	pub fn role(&self) -> Option<Role> {
		self.role
	}

	pub fn len(&self) -> usize {
		self.descriptors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.descriptors.is_empty()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.descriptors.contains_key(name)
	}

	pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
		self.descriptors.get(name)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.descriptors.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
		self.descriptors.values()
	}

	/// Adds `descriptor`, replacing any earlier descriptor with the same name
	/// in place.
	pub fn insert(&mut self, descriptor: ResourceDescriptor) {
		self.descriptors.insert(descriptor.name.clone(), descriptor);
	}
}

/// Maps a [`ResolvedIdentity`] to its [`FetchPlan`].
#[derive(Clone)]
pub struct FetchPlanBuilder {
	store: SharedStore,
}

impl FetchPlanBuilder {
	pub fn new(store: SharedStore) -> Self {
		Self { store }
	}

	pub fn build(&self, identity: &ResolvedIdentity) -> FetchPlan {
		let mut plan = FetchPlan {
			role: Some(identity.role),
			descriptors: IndexMap::new(),
		};
		for entry in groups(identity.role).iter().flat_map(|group| group.iter()) {
			let query = query_for(entry, identity);
			plan.insert(ResourceDescriptor::from_query(entry.name, query, Arc::clone(&self.store)));
		}
		tracing::debug!(role = %identity.role, resources = plan.len(), "sync.plan.built");
		plan
	}
}

fn query_for(entry: &Entry, identity: &ResolvedIdentity) -> Query {
	let (field, direction) = entry.order;
	let query = Query::table(entry.table).order_by(field, direction);
	match entry.scope {
		Scope::Everything => query,
		Scope::OwnStaffRows => {
			let staff_id = identity.staff_id.as_ref().map(|id| id.as_str().to_owned());
			query.eq("staff_id", staff_id)
		}
	}
}

/// Every resource name `role`'s plan contains, in plan order.
pub fn resource_names(role: Role) -> Vec<&'static str> {
	groups(role).iter().flat_map(|group| group.iter().map(|e| e.name)).collect()
}

#[cfg(test)]
mod tests {
	use carebase_primitives::RecordId;
	use carebase_store::MemoryStore;
	use pretty_assertions::assert_eq;

	use super::*;

	fn builder() -> FetchPlanBuilder {
		FetchPlanBuilder::new(Arc::new(MemoryStore::new()))
	}

	fn names_of(plan: &FetchPlan) -> Vec<&str> {
		plan.names().collect()
	}

	#[test]
	fn teacher_plan_layers_baseline_staff_and_scheduling() {
		let identity = ResolvedIdentity::staff(Role::Teacher, RecordId::new("st-1"), "Tess");
		let plan = builder().build(&identity);
		assert_eq!(
			names_of(&plan),
			vec!["facility", "classrooms", "announcements", "children", "attendance", "incidents", "schedules", "lesson_plans"]
		);
		assert!(!plan.contains(names::PAYROLL));

		let schedules = plan.get(names::SCHEDULES).unwrap().query();
		assert_eq!(schedules, &Query::table("schedules").order_by("starts_at", Direction::Asc).eq("staff_id", "st-1"));
	}

	#[test]
	fn parent_plan_excludes_staff_resources() {
		let identity = ResolvedIdentity::parent(RecordId::new("p-1"), "Pat");
		let plan = builder().build(&identity);
		assert_eq!(names_of(&plan), vec!["facility", "classrooms", "announcements", "billing", "reports"]);
		assert_eq!(plan.get(names::BILLING).unwrap().query().table, "invoices");
	}

	#[test]
	fn unresolved_roles_get_empty_plans() {
		assert!(builder().build(&ResolvedIdentity::unknown("x")).is_empty());
		assert!(builder().build(&ResolvedIdentity::signed_out()).is_empty());
	}

	#[test]
	fn resource_names_match_built_plans() {
		let builder = builder();
		let admin = ResolvedIdentity::staff(Role::Admin, RecordId::new("a"), "A");
		assert_eq!(resource_names(Role::Admin), names_of(&builder.build(&admin)));
	}

	#[tokio::test]
	async fn descriptors_fetch_through_the_store() {
		let store = MemoryStore::new().with_rows(
			"classrooms",
			[
				carebase_primitives::Record::new().with("name", "Sunflowers"),
				carebase_primitives::Record::new().with("name", "Acorns"),
			],
		);
		let plan = FetchPlanBuilder::new(Arc::new(store)).build(&ResolvedIdentity::parent(RecordId::new("p"), "P"));
		let rows = plan.get(names::CLASSROOMS).unwrap().fetch().await.unwrap();
		assert_eq!(rows[0].get_str("name"), Some("Acorns"));
	}
}
