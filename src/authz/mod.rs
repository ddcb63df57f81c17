//! Authorization: permission storage and resolution, route metadata and the
//! gate that ties them together.

pub mod gate;
pub mod resolver;
pub mod routes;
pub mod store;

pub use gate::{AuthorizationGate, Denial, GateDecision, gate_middleware};
pub use resolver::{LookupError, PermissionResolver};
pub use routes::{MatchedRoute, Route, RouteMetadata, RouteRegistry, RouteTable, route_middleware};
pub use store::{PermissionStore, RedisPermissionStore, StaticPermissionStore, StoreError};
