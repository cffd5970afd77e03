/// Execution classes used to label engine tasks for scheduling and tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Session-event pipeline: resolution and plan dispatch.
	Pipeline,
	/// Forwarding of identity-provider events to the pipeline.
	Watcher,
	/// One resource fetch from a plan.
	Fetch,
	/// Post-mutation refresh of a single resource.
	Refresh,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pipeline => "pipeline",
			Self::Watcher => "watcher",
			Self::Fetch => "fetch",
			Self::Refresh => "refresh",
		}
	}
}
