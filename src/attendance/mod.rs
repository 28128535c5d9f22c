//! Per-event attendance storage.
//!
//! Every event owns an attendance relation holding its registrations. The
//! relation is either a dedicated table named by [`table_name_for`] or, in the
//! partitioned layout, the event's slice of the shared `attendance` table.
//! All statements filter on `event_id`, so callers never need to know which
//! layout is active.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Event, NewEvent, Registration};

pub use memory::InMemoryStore;
pub use postgres::{PgStore, Provisioner};

/// PostgreSQL truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Name of the shared relation used by [`AttendanceLayout::Partitioned`].
pub const SHARED_TABLE: &str = "attendance";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttendanceLayout {
    /// One `attendance` table keyed by `event_id`.
    #[default]
    Partitioned,
    /// One `event_<title>_<id>` table per event, created on first registration.
    TablePerEvent,
}

impl FromStr for AttendanceLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "partitioned" | "shared" => Ok(AttendanceLayout::Partitioned),
            "table_per_event" | "table-per-event" => Ok(AttendanceLayout::TablePerEvent),
            other => Err(format!("unknown attendance layout '{other}'")),
        }
    }
}

/// Derives the attendance table name for an event.
pub fn table_name_for(event: &Event) -> String {
    attendance_table_name(&event.title, &event.id.to_string())
}

/// `event_` + sanitized title + `_` + id. The title segment is shortened when
/// needed so the whole name stays within the identifier limit; the id is kept
/// whole.
pub fn attendance_table_name(title: &str, event_id: &str) -> String {
    let mut sanitized: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push_str("event");
    }

    let fixed = "event_".len() + 1 + event_id.len();
    let room = MAX_IDENTIFIER_LEN.saturating_sub(fixed).max(1);
    if sanitized.len() > room {
        // Sanitized text is pure ASCII, so any byte index is a char boundary.
        sanitized.truncate(room);
    }

    format!("event_{sanitized}_{event_id}")
}

#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StoreError(#[from] pub sqlx::Error);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("storage rejected attendance table creation: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("email is already registered for this event")]
    DuplicateEmail,

    #[error("attendance table \"{0}\" has not been provisioned")]
    TableMissing(String),

    #[error("failed to persist registration: {0}")]
    Persist(#[source] sqlx::Error),
}

/// Which phase of an event deletion failed.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("event not found")]
    NotFound,

    #[error("failed to delete registrations: {0}")]
    Registrations(#[source] sqlx::Error),

    #[error("failed to delete event: {0}")]
    Event(#[source] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInOutcome {
    CheckedIn(Registration),
    AlreadyCheckedIn(Registration),
    NotFound,
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, new: NewEvent, created_by: Uuid) -> Result<Event, StoreError>;

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// All events, newest first.
    async fn list_events(&self) -> Result<Vec<Event>, StoreError>;
}

#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    /// Creates the event's attendance table if it does not exist yet.
    async fn ensure_table(&self, event: &Event) -> Result<(), ProvisionError>;

    async fn insert_registration(
        &self,
        event: &Event,
        name: &str,
        email: &str,
        token: &str,
    ) -> Result<Registration, InsertError>;

    /// A missing attendance table means nobody has registered.
    async fn is_registered(&self, event: &Event, email: &str) -> Result<bool, StoreError>;

    async fn find_registration(
        &self,
        event: &Event,
        id: Uuid,
    ) -> Result<Option<Registration>, StoreError>;

    async fn find_registration_by_token(
        &self,
        event: &Event,
        token: &str,
    ) -> Result<Option<Registration>, StoreError>;

    /// Registrations in sign-up order.
    async fn list_registrations(&self, event: &Event) -> Result<Vec<Registration>, StoreError>;

    /// Flips `checked_in` to true and stamps `at`, only if it was still false.
    async fn mark_checked_in(
        &self,
        event: &Event,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CheckInOutcome, StoreError>;

    /// Returns the number of rows removed.
    async fn delete_all_registrations(&self, event: &Event) -> Result<u64, DeletionError>;

    /// Deletes every registration of the event, then the event itself.
    async fn delete_event(&self, event: &Event) -> Result<(), DeletionError>;

    /// Scans `candidates` in order and returns the first registration holding
    /// `token`.
    async fn find_by_token(
        &self,
        candidates: &[Event],
        token: &str,
    ) -> Result<Option<(Event, Registration)>, StoreError> {
        for event in candidates {
            if let Some(registration) = self.find_registration_by_token(event, token).await? {
                return Ok(Some((event.clone(), registration)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_lowercases_and_replaces_punctuation() {
        assert_eq!(
            attendance_table_name("Fall Kickoff!", "E1"),
            "event_fall_kickoff__E1"
        );
    }

    #[test]
    fn test_table_name_falls_back_when_title_is_empty() {
        assert_eq!(attendance_table_name("", "E2"), "event_event_E2");
    }

    #[test]
    fn test_non_ascii_letters_become_underscores() {
        assert_eq!(attendance_table_name("Café 2026", "E3"), "event_caf__2026_E3");
    }

    #[test]
    fn test_long_titles_keep_the_whole_id() {
        let id = "5f0c6a1e-2b8c-4f1a-9d0e-7a3b2c1d0e9f";
        let name = attendance_table_name(&"Annual General Meeting ".repeat(5), id);
        assert!(name.len() <= MAX_IDENTIFIER_LEN);
        assert!(name.ends_with(&format!("_{id}")));
        assert!(name.starts_with("event_annual_general"));
    }

    #[test]
    fn test_table_name_is_stable() {
        let a = attendance_table_name("Kickoff", "E1");
        let b = attendance_table_name("Kickoff", "E1");
        assert_eq!(a, b);
        assert_ne!(a, attendance_table_name("Kickoff", "E2"));
    }

    #[test]
    fn test_layout_parsing() {
        assert_eq!(
            "table_per_event".parse::<AttendanceLayout>(),
            Ok(AttendanceLayout::TablePerEvent)
        );
        assert_eq!(
            "Partitioned".parse::<AttendanceLayout>(),
            Ok(AttendanceLayout::Partitioned)
        );
        assert!("sharded".parse::<AttendanceLayout>().is_err());
    }
}
