//! The registration use case: validate, provision, encode, persist, notify.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::attendance::{
    AttendanceGateway, EventRepository, InsertError, ProvisionError, StoreError,
};
use crate::models::{Event, Registration};
use crate::notify::{registration_email, registration_subject, NotificationError, Notifier};
use crate::qr::{self, EcLevel, TokenMetadata};
use crate::utils::session::Session;

/// Longest accepted attendee name, in characters.
pub const MAX_NAME_CHARS: usize = 200;
/// Longest accepted email address, in characters.
pub const MAX_EMAIL_CHARS: usize = 254;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStage {
    Validating,
    Provisioning,
    Encoding,
    Persisting,
    Notifying,
    Done,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationStage::Validating => "validating",
            RegistrationStage::Provisioning => "provisioning",
            RegistrationStage::Encoding => "encoding",
            RegistrationStage::Persisting => "persisting",
            RegistrationStage::Notifying => "notifying",
            RegistrationStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("event '{0}' does not exist")]
    EventNotFound(String),

    #[error("already registered for this event")]
    AlreadyRegistered,

    #[error("could not provision attendance storage")]
    ProvisioningFailed(#[source] ProvisionError),

    #[error("could not encode registration token")]
    EncodingFailed(#[source] serde_json::Error),

    #[error("could not persist registration")]
    PersistFailed(#[source] InsertError),

    #[error("could not load event")]
    Storage(#[from] StoreError),
}

impl RegistrationError {
    /// The stage the registration stopped in.
    pub fn stage(&self) -> RegistrationStage {
        match self {
            RegistrationError::InvalidInput(_)
            | RegistrationError::EventNotFound(_)
            | RegistrationError::Storage(_) => RegistrationStage::Validating,
            RegistrationError::ProvisioningFailed(_) => RegistrationStage::Provisioning,
            RegistrationError::EncodingFailed(_) => RegistrationStage::Encoding,
            RegistrationError::AlreadyRegistered | RegistrationError::PersistFailed(_) => {
                RegistrationStage::Persisting
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub event: Event,
    pub registration: Registration,
    pub token_image_url: String,
}

#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered(Registered),
    /// The row is stored; only the confirmation mail failed.
    RegisteredButNotificationFailed {
        registered: Registered,
        error: NotificationError,
    },
}

impl RegistrationOutcome {
    pub fn registered(&self) -> &Registered {
        match self {
            RegistrationOutcome::Registered(registered)
            | RegistrationOutcome::RegisteredButNotificationFailed { registered, .. } => {
                registered
            }
        }
    }

    pub fn notification_failed(&self) -> bool {
        matches!(self, RegistrationOutcome::RegisteredButNotificationFailed { .. })
    }
}

/// Public URL of a registration's QR image.
pub fn qr_image_url(public_base_url: &str, registration_id: Uuid) -> String {
    format!(
        "{}/registrations/{registration_id}/qrcode",
        public_base_url.trim_end_matches('/')
    )
}

#[derive(Clone)]
pub struct RegistrationService {
    events: Arc<dyn EventRepository>,
    attendance: Arc<dyn AttendanceGateway>,
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
}

impl RegistrationService {
    pub fn new(
        events: Arc<dyn EventRepository>,
        attendance: Arc<dyn AttendanceGateway>,
        notifier: Arc<dyn Notifier>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            events,
            attendance,
            notifier,
            public_base_url: public_base_url.into(),
        }
    }

    #[instrument(
        skip(self, session, request),
        fields(event_id = %request.event_id, profile_id = ?session.profile_id)
    )]
    pub async fn register(
        &self,
        session: &Session,
        request: RegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let result = self.run(request).await;
        if let Err(e) = &result {
            match e {
                RegistrationError::InvalidInput(_)
                | RegistrationError::EventNotFound(_)
                | RegistrationError::AlreadyRegistered => {
                    info!(stage = %e.stage(), reason = %e, "Registration rejected");
                }
                RegistrationError::EncodingFailed(cause) => {
                    error!(error = ?cause, "Token encoding failed for well-formed metadata");
                }
                _ => error!(stage = %e.stage(), error = ?e, "Registration failed"),
            }
        }
        result
    }

    async fn run(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        // Validating
        let name = request.name.trim();
        let email = request.email.trim().to_lowercase();
        let event_id = request.event_id.trim();
        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(invalid("name must be at most 200 characters"));
        }
        if email.is_empty() {
            return Err(invalid("email must not be empty"));
        }
        if email.chars().count() > MAX_EMAIL_CHARS || !is_plausible_email(&email) {
            return Err(invalid("email is not a valid address"));
        }
        if event_id.is_empty() {
            return Err(invalid("eventId must not be empty"));
        }
        let event = match Uuid::parse_str(event_id) {
            Ok(id) => self.events.find_event(id).await?,
            Err(_) => None,
        }
        .ok_or_else(|| RegistrationError::EventNotFound(event_id.to_string()))?;

        let metadata = TokenMetadata::new(
            name,
            email.as_str(),
            event.title.as_str(),
            event.id.to_string(),
        );
        // The token must stay renderable at the strongest correction level.
        let trial = qr::encode(&metadata).map_err(RegistrationError::EncodingFailed)?;
        if !qr::fits(&trial, EcLevel::H) {
            return Err(invalid("name and email are too long to fit in a QR code"));
        }

        // Provisioning
        self.attendance
            .ensure_table(&event)
            .await
            .map_err(RegistrationError::ProvisioningFailed)?;

        // Encoding
        let token = qr::encode(&metadata).map_err(RegistrationError::EncodingFailed)?;

        // Persisting
        let registration = self
            .attendance
            .insert_registration(&event, name, &email, &token)
            .await
            .map_err(|e| match e {
                InsertError::DuplicateEmail => RegistrationError::AlreadyRegistered,
                other => RegistrationError::PersistFailed(other),
            })?;
        info!(registration_id = %registration.id, "Registration stored");

        // Notifying
        let token_image_url = qr_image_url(&self.public_base_url, registration.id);
        let body = registration_email(&registration.name, &event.title, &token_image_url);
        let delivery = self
            .notifier
            .send(&registration.email, &registration_subject(&event.title), &body)
            .await;

        let registered = Registered {
            event,
            registration,
            token_image_url,
        };
        match delivery {
            Ok(()) => Ok(RegistrationOutcome::Registered(registered)),
            Err(error) => {
                warn!(
                    registration_id = %registered.registration.id,
                    error = %error,
                    "Registration stored but confirmation mail failed"
                );
                Ok(RegistrationOutcome::RegisteredButNotificationFailed { registered, error })
            }
        }
    }
}

fn invalid(message: &str) -> RegistrationError {
    RegistrationError::InvalidInput(message.to_string())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
