//! Gateway authorization primitives.
//!
//! This crate holds the I/O-free half of the gateway's authorization core:
//!
//! - [`Role`]: a normalized (upper-cased) role name, with `OWNER` detection.
//! - [`PermissionCode`]: a `resource:action` capability, optionally wildcarded
//!   as `resource:*` or `*`.
//! - [`PermissionSet`]: the union of codes granted to a caller's roles.
//! - [`RequiredPermissions`]: the codes a route asks for (logical OR).
//! - [`decide`]: the allow/deny evaluation used by the authorization gate.
//!
//! Nothing here talks to the network. The gateway crate feeds these types
//! from verified tokens and the external permission cache.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod permission;
pub mod role;

pub use permission::{
    GLOBAL_WILDCARD, PermissionCode, PermissionSet, RequiredPermissions, decide, unsatisfied,
};
pub use role::{OWNER_ROLE, Role, contains_owner};
