pub mod auth;

pub use auth::{authorization_middleware, session_middleware, CurrentPrincipal};
