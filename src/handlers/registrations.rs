use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::json_body;
use crate::checkin::CheckIn;
use crate::models::Registration;
use crate::qr::{EcLevel, RenderOptions};
use crate::registration::{RegistrationOutcome, RegistrationRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;
use crate::utils::session::Session;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationPayload {
    registration_id: Uuid,
    event_id: Uuid,
    token: String,
    token_image_url: String,
    notification: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    ec: Option<EcLevel>,
    scale: Option<u32>,
}

impl QrQuery {
    fn render_options(&self) -> RenderOptions {
        let mut options = RenderOptions::default();
        if let Some(ec) = self.ec {
            options = options.with_ec_level(ec);
        }
        if let Some(scale) = self.scale {
            options = options.with_module_scale(scale);
        }
        options
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenCheckIn {
    #[serde(default)]
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckInPayload {
    event_id: Uuid,
    event_title: String,
    registration: Registration,
    already_checked_in: bool,
}

impl From<CheckIn> for CheckInPayload {
    fn from(outcome: CheckIn) -> Self {
        let (event, registration, already_checked_in) = match outcome {
            CheckIn::CheckedIn { event, registration } => (event, registration, false),
            CheckIn::AlreadyCheckedIn { event, registration } => (event, registration, true),
        };
        Self {
            event_id: event.id,
            event_title: event.title,
            registration,
            already_checked_in,
        }
    }
}

/// Path ids that are not UUIDs cannot name a registration.
fn registration_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Registration not found".to_string()))
}

pub async fn create_registration(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(payload)?;
    let outcome = state.registrations.register(&session, request).await?;

    let (notification, message) = match &outcome {
        RegistrationOutcome::Registered(_) => ("sent", "Registration successful"),
        RegistrationOutcome::RegisteredButNotificationFailed { .. } => (
            "failed",
            "Registration successful, but the confirmation email could not be sent",
        ),
    };
    let registered = outcome.registered();
    let payload = RegistrationPayload {
        registration_id: registered.registration.id,
        event_id: registered.event.id,
        token: registered.registration.token.clone(),
        token_image_url: registered.token_image_url.clone(),
        notification,
    };
    Ok(success(payload, message))
}

pub async fn registration_qrcode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<QrQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::ValidationError(rejection.body_text()))?;
    let id = registration_id(&id)?;
    let png = state
        .checkin
        .render_token_image(id, &query.render_options())
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "private, max-age=3600"),
        ],
        png,
    )
        .into_response())
}

pub async fn check_in_registration(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    session.require_admin()?;
    let id = registration_id(&id)?;
    let outcome = state.checkin.mark_checked_in(id).await?;
    check_in_response(outcome)
}

pub async fn check_in_token(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<TokenCheckIn>, JsonRejection>,
) -> Result<Response, AppError> {
    session.require_admin()?;
    let body = json_body(payload)?;
    if body.token.trim().is_empty() {
        return Err(AppError::ValidationError("token must not be empty".to_string()));
    }
    let outcome = state.checkin.check_in_by_token(&body.token).await?;
    check_in_response(outcome)
}

fn check_in_response(outcome: CheckIn) -> Result<Response, AppError> {
    match outcome {
        CheckIn::CheckedIn { .. } => Ok(success(CheckInPayload::from(outcome), "Checked in")),
        CheckIn::AlreadyCheckedIn { registration, .. } => {
            let at = registration
                .check_in_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "an earlier time".to_string());
            Err(AppError::AlreadyCheckedIn(format!(
                "{} already checked in at {at}",
                registration.name
            )))
        }
    }
}
