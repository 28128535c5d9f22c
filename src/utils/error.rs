use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::attendance::{DeletionError, InsertError, StoreError};
use crate::checkin::LookupError;
use crate::registration::RegistrationError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Already checked in: {0}")]
    AlreadyCheckedIn(String),

    #[error("Provisioning failed")]
    ProvisioningFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Persist failed")]
    PersistFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Deletion failed")]
    DeletionFailed(#[source] DeletionError),

    #[error("Storage error")]
    StorageError(#[from] StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_)
            | AppError::EventNotFound(_)
            | AppError::MalformedToken(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyRegistered(_) | AppError::AlreadyCheckedIn(_) => StatusCode::CONFLICT,
            AppError::ProvisioningFailed(_)
            | AppError::PersistFailed(_)
            | AppError::DeletionFailed(_)
            | AppError::StorageError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason returned to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "InvalidInput",
            AppError::EventNotFound(_) => "EventNotFound",
            AppError::MalformedToken(_) => "MalformedToken",
            AppError::AuthError(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::NotFound(_) => "NotFound",
            AppError::AlreadyRegistered(_) => "AlreadyRegistered",
            AppError::AlreadyCheckedIn(_) => "AlreadyCheckedIn",
            AppError::ProvisioningFailed(_) => "ProvisioningFailed",
            AppError::PersistFailed(_) => "PersistFailed",
            AppError::DeletionFailed(_) => "DeletionFailed",
            AppError::StorageError(_) => "StorageError",
            AppError::InternalServerError(_) => "InternalServerError",
        }
    }

    fn log(&self) {
        match self {
            AppError::ProvisioningFailed(cause) | AppError::PersistFailed(cause) => {
                error!(reason = self.reason(), error = ?cause, "Storage failure");
            }
            AppError::DeletionFailed(e) => {
                error!(reason = self.reason(), error = ?e, "Event deletion failed");
            }
            AppError::StorageError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal error");
            }
            _ => {
                warn!(reason = self.reason(), message = %self, "Request rejected");
            }
        }
    }

    /// Message safe to show to end users. Server-side failures get a generic
    /// text; the cause only goes to the log.
    fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::EventNotFound(msg)
            | AppError::MalformedToken(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::AlreadyRegistered(msg)
            | AppError::AlreadyCheckedIn(msg) => msg.clone(),
            AppError::ProvisioningFailed(_) | AppError::PersistFailed(_) => {
                "Registration could not be saved, please try again later".to_string()
            }
            AppError::DeletionFailed(_) => {
                "Event could not be deleted, please try again later".to_string()
            }
            AppError::StorageError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<RegistrationError> for AppError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::InvalidInput(msg) => AppError::ValidationError(msg),
            RegistrationError::EventNotFound(id) => {
                AppError::EventNotFound(format!("Event '{id}' does not exist"))
            }
            RegistrationError::AlreadyRegistered => AppError::AlreadyRegistered(
                "This email is already registered for the event".to_string(),
            ),
            RegistrationError::ProvisioningFailed(cause) => {
                AppError::ProvisioningFailed(Box::new(cause))
            }
            RegistrationError::PersistFailed(cause) => AppError::PersistFailed(Box::new(cause)),
            RegistrationError::EncodingFailed(cause) => {
                AppError::InternalServerError(format!("token encoding failed: {cause}"))
            }
            // Registration only ever reports ProvisioningFailed or PersistFailed.
            RegistrationError::Storage(cause) => AppError::PersistFailed(Box::new(cause)),
        }
    }
}

impl From<LookupError> for AppError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound => AppError::NotFound("Registration not found".to_string()),
            LookupError::MalformedToken(msg) => AppError::MalformedToken(msg),
            LookupError::Render(cause) => {
                AppError::InternalServerError(format!("QR rendering failed: {cause}"))
            }
            LookupError::Storage(e) => AppError::StorageError(e),
        }
    }
}

impl From<DeletionError> for AppError {
    fn from(e: DeletionError) -> Self {
        match e {
            DeletionError::NotFound => AppError::NotFound("Event not found".to_string()),
            other => AppError::DeletionFailed(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let reason = self.reason();

        // Log internal details
        self.log();

        // Do not expose internal details in the API response
        error_response(reason, self.public_message(), None, status)
    }
}
