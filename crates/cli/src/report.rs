use carebase_primitives::Role;
use carebase_sync::ApplicationState;
use serde::Serialize;

/// JSON summary printed after the engine settles.
#[derive(Debug, Serialize)]
pub struct Summary {
	pub generation: u64,
	pub role: Role,
	pub display_name: String,
	pub is_loading: bool,
	pub session_error: Option<String>,
	/// Slices in plan order.
	pub slices: Vec<SliceSummary>,
}

#[derive(Debug, Serialize)]
pub struct SliceSummary {
	pub name: String,
	/// Rows visible to the identity, after parent scoping.
	pub records: usize,
	pub is_loading: bool,
	pub last_error: Option<String>,
}

impl Summary {
	pub fn from_state(state: &ApplicationState) -> Self {
		let slices = state
			.slices
			.iter()
			.map(|(name, slice)| SliceSummary {
				name: name.clone(),
				records: state.scoped(name).map_or(0, |rows| rows.len()),
				is_loading: slice.is_loading,
				last_error: slice.last_error.as_ref().map(ToString::to_string),
			})
			.collect();
		Self {
			generation: state.generation.get(),
			role: state.identity.role,
			display_name: state.identity.display_name.clone(),
			is_loading: state.is_loading,
			session_error: state.session_error.as_ref().map(ToString::to_string),
			slices,
		}
	}

	pub fn failed(&self) -> bool {
		self.session_error.is_some()
	}
}
