//! Session-driven, role-scoped data synchronization.
//!
//! Session events flow through one pipeline: resolve the session into a
//! single role, build that role's fetch plan, fetch every resource
//! concurrently, and publish the results into the [`StateStore`]. Writes go
//! through the [`MutationCoordinator`], which refreshes the affected resource
//! with the same orchestration machinery. Generations tag every result so
//! nothing from a superseded session ever lands in state.

pub mod config;
mod engine;
pub mod error;
mod mutation;
mod notify;
mod orchestrator;
pub mod plan;
pub mod resolve;
pub mod scope;
mod state;

pub use config::{ConfigError, SyncConfig};
pub use engine::SyncEngine;
pub use error::{MutationError, RefreshError, ResolutionError, ResourceFetchError, SessionError, SyncError};
pub use mutation::{ActivePlan, MutationCoordinator, MutationOutcome};
pub use notify::{Level, Notification, Notifier};
pub use orchestrator::{FetchOrchestrator, PlanReport, RefreshOutcome};
pub use plan::{FetchPlan, FetchPlanBuilder, ResourceDescriptor};
pub use resolve::RoleResolver;
pub use state::{ApplicationState, MergeOutcome, ResourceSlice, SliceRequest, SliceUpdate, StateStore};
