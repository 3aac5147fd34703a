pub mod client;
pub mod session_cookie;
pub mod validation;

pub use client::ClientInfo;
pub use validation::{ValidatedJson, ValidatedQuery};
