//! Account provisioning across the identity provider and the local store.
//!
//! The two systems share no transaction. Signup is a saga: create the
//! provider account, then the local principal, and delete the provider
//! account again if the local step fails. A failed deletion is reported,
//! not retried; the orphaned account needs an operator.

use metrics::counter;
use service_core::error::AppError;
use std::sync::Arc;

use super::error::{CompensationFailed, ProviderError};
use super::identity_provider::{IdentityProvider, ProviderSession};
use super::store::PrincipalStore;
use crate::models::principal::normalize_email;
use crate::models::{NewPrincipal, Principal};

/// Where a signup saga currently stands. Every state after `Started`
/// records the provider account it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaState {
    Started,
    ProviderCreated { external_id: String },
    PrincipalCreated { external_id: String, principal_id: i64 },
    Compensated { external_id: String },
    CompensationFailed { external_id: String },
}

impl SagaState {
    pub fn label(&self) -> &'static str {
        match self {
            SagaState::Started => "started",
            SagaState::ProviderCreated { .. } => "provider_created",
            SagaState::PrincipalCreated { .. } => "principal_created",
            SagaState::Compensated { .. } => "compensated",
            SagaState::CompensationFailed { .. } => "compensation_failed",
        }
    }

    /// True when the provider holds an account with no local principal.
    pub fn is_inconsistent(&self) -> bool {
        matches!(
            self,
            SagaState::ProviderCreated { .. } | SagaState::CompensationFailed { .. }
        )
    }
}

/// A principal together with the provider session issued for it, if any.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub principal: Principal,
    pub provider_session: Option<ProviderSession>,
}

/// One signup attempt. Each step is only valid from the state the previous
/// step left behind.
#[derive(Debug)]
pub struct SignupSaga {
    email: String,
    display_name: Option<String>,
    state: SagaState,
    history: Vec<SagaState>,
    provider_session: Option<ProviderSession>,
}

impl SignupSaga {
    pub fn new(email: &str, display_name: Option<String>) -> Self {
        Self {
            email: normalize_email(email),
            display_name,
            state: SagaState::Started,
            history: vec![SagaState::Started],
            provider_session: None,
        }
    }

    pub fn state(&self) -> &SagaState {
        &self.state
    }

    /// Every state the saga has passed through, oldest first.
    pub fn history(&self) -> &[SagaState] {
        &self.history
    }

    fn transition(&mut self, next: SagaState) {
        tracing::debug!(
            email = %self.email,
            from = self.state.label(),
            to = next.label(),
            "Signup saga transition"
        );
        self.history.push(next.clone());
        self.state = next;
    }

    fn external_id(&self) -> Option<&str> {
        match &self.state {
            SagaState::Started => None,
            SagaState::ProviderCreated { external_id }
            | SagaState::PrincipalCreated { external_id, .. }
            | SagaState::Compensated { external_id }
            | SagaState::CompensationFailed { external_id } => Some(external_id),
        }
    }

    fn out_of_order(&self, step: &str) -> AppError {
        AppError::InternalError(anyhow::anyhow!(
            "Signup step '{}' attempted in state '{}'",
            step,
            self.state.label()
        ))
    }

    /// Step 1: create the credential record at the provider.
    pub async fn create_provider_account(
        &mut self,
        provider: &dyn IdentityProvider,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<(), AppError> {
        if self.state != SagaState::Started {
            return Err(self.out_of_order("create_provider_account"));
        }

        let account = provider.sign_up(&self.email, password, request_id).await?;
        self.provider_session = account.session;
        self.transition(SagaState::ProviderCreated {
            external_id: account.external_id,
        });
        Ok(())
    }

    /// Step 2: create the local principal linked to the provider account.
    pub async fn create_principal(
        &mut self,
        principals: &dyn PrincipalStore,
    ) -> Result<Principal, AppError> {
        let SagaState::ProviderCreated { external_id } = &self.state else {
            return Err(self.out_of_order("create_principal"));
        };
        let external_id = external_id.clone();

        let principal = principals
            .insert_principal(&NewPrincipal::new(
                self.email.clone(),
                self.display_name.clone(),
                Some(external_id.clone()),
            ))
            .await?;

        self.transition(SagaState::PrincipalCreated {
            external_id,
            principal_id: principal.principal_id,
        });
        Ok(principal)
    }

    /// Step 3: undo step 1 after step 2 failed with `cause`. Returns the
    /// error to surface: `cause` itself when the undo worked, otherwise a
    /// composite carrying both failures.
    pub async fn compensate(
        &mut self,
        provider: &dyn IdentityProvider,
        cause: AppError,
        request_id: Option<&str>,
    ) -> AppError {
        let SagaState::ProviderCreated { external_id } = &self.state else {
            return cause;
        };
        let external_id = external_id.clone();

        match provider.delete_account(&external_id, request_id).await {
            Ok(()) => {
                tracing::warn!(
                    email = %self.email,
                    external_id = %external_id,
                    error = %cause,
                    "Principal creation failed; provider account removed"
                );
                self.transition(SagaState::Compensated { external_id });
                cause
            }
            // An earlier delete attempt may have landed before timing out.
            Err(ProviderError::AccountNotFound(_)) => {
                tracing::warn!(
                    email = %self.email,
                    external_id = %external_id,
                    error = %cause,
                    "Principal creation failed; provider account already gone"
                );
                self.transition(SagaState::Compensated { external_id });
                cause
            }
            Err(compensation) => {
                tracing::error!(
                    email = %self.email,
                    external_id = %external_id,
                    error = %cause,
                    compensation_error = %compensation,
                    "Principal creation failed and provider account could not be removed"
                );
                self.transition(SagaState::CompensationFailed {
                    external_id: external_id.clone(),
                });
                CompensationFailed {
                    email: self.email.clone(),
                    external_id,
                    cause,
                    compensation,
                }
                .into()
            }
        }
    }

    pub fn take_provider_session(&mut self) -> Option<ProviderSession> {
        self.provider_session.take()
    }
}

#[derive(Clone)]
pub struct ProvisioningService {
    provider: Arc<dyn IdentityProvider>,
    principals: Arc<dyn PrincipalStore>,
}

impl ProvisioningService {
    pub fn new(provider: Arc<dyn IdentityProvider>, principals: Arc<dyn PrincipalStore>) -> Self {
        Self {
            provider,
            principals,
        }
    }

    /// Run the signup saga to completion. Not safe to retry blindly after a
    /// compensation failure: the provider may already hold the account.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
        request_id: Option<&str>,
    ) -> Result<Provisioned, AppError> {
        let mut saga = SignupSaga::new(email, display_name);
        let result = self.drive(&mut saga, password, request_id).await;

        let outcome = match (&result, saga.state()) {
            (Err(_), SagaState::Started) => "provider_rejected",
            (_, state) => state.label(),
        };
        counter!("signup_saga_outcomes_total", "state" => outcome).increment(1);

        if let Some(external_id) = saga.external_id() {
            tracing::info!(
                external_id = %external_id,
                outcome,
                steps = saga.history().len(),
                "Signup saga finished"
            );
        }

        result
    }

    async fn drive(
        &self,
        saga: &mut SignupSaga,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<Provisioned, AppError> {
        saga.create_provider_account(self.provider.as_ref(), password, request_id)
            .await?;

        match saga.create_principal(self.principals.as_ref()).await {
            Ok(principal) => Ok(Provisioned {
                principal,
                provider_session: saga.take_provider_session(),
            }),
            Err(cause) => Err(saga
                .compensate(self.provider.as_ref(), cause, request_id)
                .await),
        }
    }

    /// Verify credentials at the provider and resolve the linked principal.
    /// A provider account without a local principal is not provisioned here.
    pub async fn log_in(
        &self,
        email: &str,
        password: &str,
        request_id: Option<&str>,
    ) -> Result<Provisioned, AppError> {
        let account = self
            .provider
            .sign_in(&normalize_email(email), password, request_id)
            .await?;

        let principal = self
            .principals
            .find_principal_by_external_id(&account.external_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    external_id = %account.external_id,
                    "Provider account has no linked principal"
                );
                AppError::NotFound(anyhow::anyhow!("No principal linked to this account"))
            })?;

        tracing::info!(principal_id = principal.principal_id, "Principal logged in");

        Ok(Provisioned {
            principal,
            provider_session: account.session,
        })
    }
}
