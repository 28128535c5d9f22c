//! Resolving a presented registration id or token back to its event, for QR
//! image serving and check-in.
//!
//! Registrations live in per-event attendance relations, so a lookup by id
//! probes every event in turn. That is linear in the number of events, which
//! is fine at the scale of a single campus deployment.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::attendance::{AttendanceGateway, CheckInOutcome, EventRepository, StoreError};
use crate::models::{Event, Registration};
use crate::qr::{self, RenderError, RenderOptions};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("registration not found")]
    NotFound,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("could not render QR code")]
    Render(#[source] RenderError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckIn {
    CheckedIn { event: Event, registration: Registration },
    /// Nothing was changed; `registration` carries the original check-in time.
    AlreadyCheckedIn { event: Event, registration: Registration },
}

impl CheckIn {
    pub fn registration(&self) -> &Registration {
        match self {
            CheckIn::CheckedIn { registration, .. }
            | CheckIn::AlreadyCheckedIn { registration, .. } => registration,
        }
    }
}

#[derive(Clone)]
pub struct CheckInService {
    events: Arc<dyn EventRepository>,
    attendance: Arc<dyn AttendanceGateway>,
}

impl CheckInService {
    pub fn new(events: Arc<dyn EventRepository>, attendance: Arc<dyn AttendanceGateway>) -> Self {
        Self { events, attendance }
    }

    pub async fn resolve_by_registration_id(
        &self,
        id: Uuid,
    ) -> Result<(Event, Registration), LookupError> {
        let events = self.events.list_events().await?;
        for event in events {
            if let Some(registration) = self.attendance.find_registration(&event, id).await? {
                return Ok((event, registration));
            }
        }
        debug!(registration_id = %id, "No event holds this registration");
        Err(LookupError::NotFound)
    }

    /// Resolves a scanned token. The token must decode to valid metadata; the
    /// event it names is searched first.
    pub async fn resolve_by_token(
        &self,
        token: &str,
    ) -> Result<(Event, Registration), LookupError> {
        let token = token.trim();
        let metadata =
            qr::decode(token).map_err(|e| LookupError::MalformedToken(e.to_string()))?;
        qr::validate(&metadata).map_err(|e| LookupError::MalformedToken(e.to_string()))?;

        let mut candidates = self.events.list_events().await?;
        if let Some(hinted) = candidates
            .iter()
            .position(|event| event.id.to_string() == metadata.event_id)
        {
            let event = candidates.remove(hinted);
            candidates.insert(0, event);
        }

        self.attendance
            .find_by_token(&candidates, token)
            .await?
            .ok_or(LookupError::NotFound)
    }

    pub async fn render_token_image(
        &self,
        id: Uuid,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, LookupError> {
        let (_, registration) = self.resolve_by_registration_id(id).await?;
        qr::render_image(&registration.token, options).map_err(LookupError::Render)
    }

    pub async fn mark_checked_in(&self, id: Uuid) -> Result<CheckIn, LookupError> {
        let (event, registration) = self.resolve_by_registration_id(id).await?;
        self.check_in(event, registration).await
    }

    pub async fn check_in_by_token(&self, token: &str) -> Result<CheckIn, LookupError> {
        let (event, registration) = self.resolve_by_token(token).await?;
        self.check_in(event, registration).await
    }

    async fn check_in(
        &self,
        event: Event,
        registration: Registration,
    ) -> Result<CheckIn, LookupError> {
        match self
            .attendance
            .mark_checked_in(&event, registration.id, Utc::now())
            .await?
        {
            CheckInOutcome::CheckedIn(registration) => {
                info!(registration_id = %registration.id, event_id = %event.id, "Checked in");
                Ok(CheckIn::CheckedIn { event, registration })
            }
            CheckInOutcome::AlreadyCheckedIn(registration) => {
                debug!(registration_id = %registration.id, "Already checked in");
                Ok(CheckIn::AlreadyCheckedIn { event, registration })
            }
            // Deleted between lookup and update.
            CheckInOutcome::NotFound => Err(LookupError::NotFound),
        }
    }
}
