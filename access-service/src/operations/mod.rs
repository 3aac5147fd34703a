//! Request operations.
//!
//! Every auth and admin request runs as an [`Operation`]: its input is
//! checked by `validate`, applied by `execute`, and the result is shaped
//! into a response body by `transform`. Handlers only extract inputs and
//! call [`run_operation`].

pub mod admin;
pub mod auth;

use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use std::time::Instant;

use crate::AppState;

#[async_trait]
pub trait Operation: Send + Sync {
    type Input: Send + 'static;
    type Output: Send;
    type Body: Serialize + Send;

    const NAME: &'static str;

    /// Checks that need no store access.
    fn validate(&self, _input: &Self::Input) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(&self, state: &AppState, input: Self::Input) -> Result<Self::Output, AppError>;

    fn transform(&self, output: Self::Output) -> Self::Body;

    fn success_status(&self) -> StatusCode {
        StatusCode::OK
    }
}

/// Status and body produced by a successful operation.
#[derive(Debug)]
pub struct OperationResponse<B> {
    pub status: StatusCode,
    pub body: B,
}

impl<B: Serialize> IntoResponse for OperationResponse<B> {
    fn into_response(self) -> Response {
        if self.status == StatusCode::NO_CONTENT {
            return self.status.into_response();
        }
        (self.status, Json(self.body)).into_response()
    }
}

pub async fn run_operation<O: Operation>(
    operation: &O,
    state: &AppState,
    input: O::Input,
) -> Result<OperationResponse<O::Body>, AppError> {
    let started = Instant::now();

    let result = match operation.validate(&input) {
        Ok(()) => operation.execute(state, input).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            tracing::debug!(
                operation = O::NAME,
                outcome = "success",
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Operation completed"
            );
            Ok(OperationResponse {
                status: operation.success_status(),
                body: operation.transform(output),
            })
        }
        Err(e) => {
            tracing::info!(
                operation = O::NAME,
                outcome = "failure",
                status = e.status_code().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Operation failed"
            );
            Err(e)
        }
    }
}
