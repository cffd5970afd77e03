//! Core types shared by every carebase crate: ids, roles, sessions, records, and queries.

/// Boxed future alias.
pub mod future;
/// Identifier newtypes and the generation counter.
pub mod ids;
/// Query descriptions understood by record stores.
pub mod query;
/// Loosely-typed domain records.
pub mod record;
/// Closed role type and the resolved identity triple.
pub mod role;
/// Sessions, session events, and auth actions.
pub mod session;

pub use future::BoxFutureStatic;
pub use ids::{Generation, RecordId, SubjectId};
pub use query::{Direction, Filter, FilterOp, Order, Query};
pub use record::{Collection, Record};
pub use role::{ResolvedIdentity, Role, RoleParseError};
pub use session::{AuthAction, Credentials, Session, SessionEvent, SessionEventKind};
