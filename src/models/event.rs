use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

/// Longest accepted event title, in characters. Titles travel inside every
/// registration token, so they share the QR code's capacity with attendee
/// details.
pub const MAX_TITLE_CHARS: usize = 200;

/// Admin-supplied fields for a new event. The id, creation time and owner are
/// assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
}

impl NewEvent {
    /// Returns the first problem with the submitted fields, if any.
    pub fn problem(&self) -> Option<&'static str> {
        if self.title.trim().is_empty() {
            return Some("title must not be empty");
        }
        if self.title.trim().chars().count() > MAX_TITLE_CHARS {
            return Some("title must be at most 200 characters");
        }
        if self.location.trim().is_empty() {
            return Some("location must not be empty");
        }
        None
    }
}
