//! Per-request access decisions.
//!
//! The registry is consulted on every call; nothing is cached, so admin
//! changes to endpoints, roles and grants apply to the next request.

use metrics::counter;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;

use super::store::RegistryStore;
use crate::models::endpoint::{normalize_method, resolve_endpoint};
use crate::models::Principal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed { endpoint_id: i64 },
    /// No registered (pattern, method) pair serves the path.
    NoEndpoint,
    /// The endpoint exists but the request carries no principal.
    Unauthenticated { endpoint_id: i64 },
    /// The principal holds none of the endpoint's required permissions.
    Forbidden { endpoint_id: i64 },
}

impl AccessDecision {
    pub fn outcome(&self) -> &'static str {
        match self {
            AccessDecision::Allowed { .. } => "allowed",
            AccessDecision::NoEndpoint => "no_endpoint",
            AccessDecision::Unauthenticated { .. } => "unauthenticated",
            AccessDecision::Forbidden { .. } => "forbidden",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed { .. })
    }

    /// Map a denial onto the transport error taxonomy.
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            AccessDecision::Allowed { .. } => Ok(()),
            AccessDecision::NoEndpoint => Err(AppError::NotFound(anyhow::anyhow!(
                "No such endpoint"
            ))),
            AccessDecision::Unauthenticated { .. } => Err(AppError::Unauthorized(
                anyhow::anyhow!("Authentication required"),
            )),
            AccessDecision::Forbidden { .. } => Err(AppError::Forbidden(anyhow::anyhow!(
                "Insufficient permissions"
            ))),
        }
    }
}

/// Holding any one required permission is sufficient. An endpoint with no
/// required permissions admits nobody.
pub fn permits(held: &HashSet<i64>, required: &[i64]) -> bool {
    required.iter().any(|id| held.contains(id))
}

#[derive(Clone)]
pub struct Authorizer {
    registry: Arc<dyn RegistryStore>,
}

impl Authorizer {
    pub fn new(registry: Arc<dyn RegistryStore>) -> Self {
        Self { registry }
    }

    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        path: &str,
        method: &str,
    ) -> Result<AccessDecision, AppError> {
        let decision = self.decide(principal, path, method).await?;

        counter!("authz_decisions_total", "outcome" => decision.outcome()).increment(1);
        tracing::debug!(
            path,
            method,
            principal_id = principal.map(|p| p.principal_id),
            outcome = decision.outcome(),
            "Access decision"
        );

        Ok(decision)
    }

    async fn decide(
        &self,
        principal: Option<&Principal>,
        path: &str,
        method: &str,
    ) -> Result<AccessDecision, AppError> {
        let candidates = self
            .registry
            .list_endpoints_by_method(&normalize_method(method))
            .await?;

        let Some(endpoint) = resolve_endpoint(&candidates, path) else {
            return Ok(AccessDecision::NoEndpoint);
        };
        let endpoint_id = endpoint.endpoint_id;

        let Some(principal) = principal else {
            return Ok(AccessDecision::Unauthenticated { endpoint_id });
        };

        let required = self.registry.endpoint_permission_ids(endpoint_id).await?;
        if required.is_empty() {
            tracing::warn!(
                endpoint_id,
                pattern = %endpoint.path_pattern,
                "Endpoint has no required permissions; denying"
            );
            return Ok(AccessDecision::Forbidden { endpoint_id });
        }

        let held = self
            .registry
            .principal_permission_ids(principal.principal_id)
            .await?;

        if permits(&held, &required) {
            Ok(AccessDecision::Allowed { endpoint_id })
        } else {
            Ok(AccessDecision::Forbidden { endpoint_id })
        }
    }
}
