use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a registrant's QR code says about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Event title at registration time.
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TokenMetadata {
    /// Metadata stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        event: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            event: event.into(),
            event_id: event_id.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("token is not valid base64")]
    MalformedToken(#[source] base64::DecodeError),

    #[error("token payload is not registration metadata")]
    MalformedPayload(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Serializes `metadata` and base64-encodes it.
pub fn encode(metadata: &TokenMetadata) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(metadata)?;
    Ok(STANDARD.encode(json))
}

pub fn decode(token: &str) -> Result<TokenMetadata, DecodeError> {
    let bytes = STANDARD
        .decode(token.trim())
        .map_err(DecodeError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(DecodeError::MalformedPayload)
}

/// Checks that every identifying field is present. Types are not inspected.
pub fn validate(metadata: &TokenMetadata) -> Result<(), ValidationError> {
    let fields = [
        ("name", &metadata.name),
        ("email", &metadata.email),
        ("event", &metadata.event),
        ("eventId", &metadata.event_id),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }
    Ok(())
}
