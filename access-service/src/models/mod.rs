//! Domain models for the access-control core.

pub mod endpoint;
pub mod permission;
pub mod principal;
pub mod role;
pub mod session;

pub use endpoint::{Endpoint, EndpointPermission, PathPattern, Segment};
pub use permission::Permission;
pub use principal::{NewPrincipal, Principal, PrincipalWithGrant};
pub use role::{Role, RolePermission, RoleUpdate, UserRole};
pub use session::Session;
