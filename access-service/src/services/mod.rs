//! Services layer for access-service.
//!
//! Session authentication, endpoint authorization, registry administration
//! and account provisioning, over pluggable stores.

pub mod authenticator;
pub mod authorizer;
pub mod bootstrap;
mod database;
pub mod error;
pub mod identity_provider;
mod memory;
pub mod provisioning;
pub mod registry;
pub mod sessions;
pub mod store;

pub use authenticator::{Authenticated, Authenticator};
pub use authorizer::{AccessDecision, Authorizer};
pub use database::Database;
pub use error::{CompensationFailed, ProviderError};
pub use identity_provider::{
    HttpIdentityProvider, IdentityProvider, MockIdentityProvider, ProviderAccount, ProviderSession,
};
pub use memory::MemoryStore;
pub use provisioning::{Provisioned, ProvisioningService, SagaState, SignupSaga};
pub use registry::{EndpointDetail, PrincipalRole, RegistryService, RoleDetail};
pub use sessions::{IssuedSession, SessionService};
pub use store::{PrincipalStore, RegistryStore, SessionStore, Stores};
