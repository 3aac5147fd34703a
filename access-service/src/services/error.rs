use service_core::error::AppError;
use thiserror::Error;

/// Failures reported by the external identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Provider account not found: {0}")]
    AccountNotFound(String),

    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Provider unreachable: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ProviderError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ProviderError::AccountNotFound(id) => {
                AppError::NotFound(anyhow::anyhow!("Provider account not found: {}", id))
            }
            ProviderError::Rejected { status, message } if (400..500).contains(&status) => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            other => AppError::ExternalService(anyhow::Error::new(other)),
        }
    }
}

/// Signup left an account at the provider that could not be removed after
/// the local principal insert failed. Needs operator reconciliation.
#[derive(Error, Debug)]
#[error(
    "signup for {email} left provider account {external_id} orphaned: \
     principal creation failed ({cause}); compensation failed ({compensation})"
)]
pub struct CompensationFailed {
    pub email: String,
    pub external_id: String,
    pub cause: AppError,
    pub compensation: ProviderError,
}

impl From<CompensationFailed> for AppError {
    fn from(err: CompensationFailed) -> Self {
        // The caller sees the identifiers; the nested store and provider
        // failures only reach the log.
        let summary = format!(
            "signup for {} left provider account {} orphaned; needs operator reconciliation",
            err.email, err.external_id
        );
        AppError::ExternalService(anyhow::Error::new(err).context(summary))
    }
}

/// Translate a sqlx failure: unique violations become conflicts, foreign-key
/// violations become not-found, everything else is a database error.
pub fn map_db_error(err: sqlx::Error, entity: &str) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(anyhow::anyhow!("{} already exists", entity));
        }
        if db_err.is_foreign_key_violation() {
            return AppError::NotFound(anyhow::anyhow!(
                "{} references a record that does not exist",
                entity
            ));
        }
    }
    AppError::DatabaseError(anyhow::anyhow!(err))
}
