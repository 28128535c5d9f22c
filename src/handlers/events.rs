use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::json_body;
use crate::models::{Event, NewEvent};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};
use crate::utils::session::Session;

async fn load_event(state: &AppState, raw_id: &str) -> Result<Event, AppError> {
    let not_found = || AppError::NotFound(format!("Event '{raw_id}' does not exist"));
    let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
    state.events.find_event(id).await?.ok_or_else(not_found)
}

pub async fn list_events(State(state): State<AppState>) -> Result<Response, AppError> {
    let events = state.events.list_events().await?;
    Ok(success(events, "Events retrieved"))
}

pub async fn create_event(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<Response, AppError> {
    let admin = session.require_admin()?;
    let new = json_body(payload)?;
    if let Some(problem) = new.problem() {
        return Err(AppError::ValidationError(problem.to_string()));
    }

    let event = state.events.create_event(new, admin).await?;
    tracing::info!(event_id = %event.id, created_by = %admin, "Event created");
    Ok(created(event, "Event created"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    session.require_admin()?;
    let event = load_event(&state, &id).await?;
    state.attendance.delete_event(&event).await?;
    Ok(empty_success("Event deleted"))
}

pub async fn list_event_registrations(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    session.require_admin()?;
    let event = load_event(&state, &id).await?;
    let registrations = state.attendance.list_registrations(&event).await?;
    Ok(success(registrations, "Registrations retrieved"))
}
