use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    table_name_for, AttendanceGateway, CheckInOutcome, DeletionError, EventRepository,
    InsertError, ProvisionError, StoreError,
};
use crate::models::{Event, NewEvent, Registration};

#[derive(Debug, Default)]
struct State {
    /// Insertion order.
    events: Vec<Event>,
    /// Attendance tables by name, rows in insertion order.
    tables: HashMap<String, Vec<Registration>>,
}

/// Process-local store with table-per-event semantics: attendance tables only
/// exist once provisioned, and reading a missing one yields nothing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still holds consistent data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of provisioned attendance tables.
    pub fn table_count(&self) -> usize {
        self.lock().tables.len()
    }

    pub fn has_table(&self, event: &Event) -> bool {
        self.lock().tables.contains_key(&table_name_for(event))
    }

    /// Total registrations across all attendance tables.
    pub fn registration_count(&self) -> usize {
        self.lock().tables.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn create_event(&self, new: NewEvent, created_by: Uuid) -> Result<Event, StoreError> {
        let event = Event {
            id: Uuid::new_v4(),
            title: new.title.trim().to_string(),
            description: new.description,
            location: new.location.trim().to_string(),
            event_date: new.event_date,
            event_time: new.event_time,
            created_at: Utc::now(),
            created_by,
        };
        self.lock().events.push(event.clone());
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.lock().events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self.lock().events.iter().rev().cloned().collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }
}

#[async_trait]
impl AttendanceGateway for InMemoryStore {
    async fn ensure_table(&self, event: &Event) -> Result<(), ProvisionError> {
        let table = table_name_for(event);
        let mut state = self.lock();
        if !state.tables.contains_key(&table) {
            state.tables.insert(table.clone(), Vec::new());
            info!(table = %table, event_id = %event.id, "Attendance table provisioned");
        }
        Ok(())
    }

    async fn insert_registration(
        &self,
        event: &Event,
        name: &str,
        email: &str,
        token: &str,
    ) -> Result<Registration, InsertError> {
        let table = table_name_for(event);
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(&table) else {
            return Err(InsertError::TableMissing(table));
        };

        if rows.iter().any(|r| r.email == email) {
            return Err(InsertError::DuplicateEmail);
        }

        let registration = Registration {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: name.to_string(),
            email: email.to_string(),
            token: token.to_string(),
            registered_at: Utc::now(),
            checked_in: false,
            check_in_time: None,
        };
        rows.push(registration.clone());
        Ok(registration)
    }

    async fn is_registered(&self, event: &Event, email: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(&table_name_for(event))
            .is_some_and(|rows| rows.iter().any(|r| r.email == email)))
    }

    async fn find_registration(
        &self,
        event: &Event,
        id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(&table_name_for(event))
            .and_then(|rows| rows.iter().find(|r| r.id == id).cloned()))
    }

    async fn find_registration_by_token(
        &self,
        event: &Event,
        token: &str,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(&table_name_for(event))
            .and_then(|rows| rows.iter().find(|r| r.token == token).cloned()))
    }

    async fn list_registrations(&self, event: &Event) -> Result<Vec<Registration>, StoreError> {
        Ok(self
            .lock()
            .tables
            .get(&table_name_for(event))
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_checked_in(
        &self,
        event: &Event,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CheckInOutcome, StoreError> {
        let mut state = self.lock();
        let Some(row) = state
            .tables
            .get_mut(&table_name_for(event))
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
        else {
            return Ok(CheckInOutcome::NotFound);
        };

        if row.checked_in {
            return Ok(CheckInOutcome::AlreadyCheckedIn(row.clone()));
        }
        row.checked_in = true;
        row.check_in_time = Some(at);
        Ok(CheckInOutcome::CheckedIn(row.clone()))
    }

    async fn delete_all_registrations(&self, event: &Event) -> Result<u64, DeletionError> {
        let mut state = self.lock();
        let removed = state
            .tables
            .get_mut(&table_name_for(event))
            .map(|rows| {
                let count = rows.len();
                rows.clear();
                count
            })
            .unwrap_or(0);
        debug!(event_id = %event.id, removed, "Registrations deleted");
        Ok(removed as u64)
    }

    async fn delete_event(&self, event: &Event) -> Result<(), DeletionError> {
        let mut state = self.lock();
        let Some(position) = state.events.iter().position(|e| e.id == event.id) else {
            return Err(DeletionError::NotFound);
        };

        let removed = state
            .tables
            .remove(&table_name_for(event))
            .map(|rows| rows.len())
            .unwrap_or(0);
        state.events.remove(position);
        info!(event_id = %event.id, removed, "Event and registrations deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn new_event(title: &str) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            description: None,
            location: "Main Hall".to_string(),
            event_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            event_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }

    async fn store_with_event(title: &str) -> (InMemoryStore, Event) {
        let store = InMemoryStore::new();
        let event = store
            .create_event(new_event(title), Uuid::new_v4())
            .await
            .unwrap();
        (store, event)
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let (store, event) = store_with_event("Fall Kickoff!").await;
        for _ in 0..5 {
            store.ensure_table(&event).await.unwrap();
        }
        assert_eq!(store.table_count(), 1);
        assert!(store.has_table(&event));
    }

    #[tokio::test]
    async fn test_missing_table_means_nobody_registered() {
        let (store, event) = store_with_event("Kickoff").await;
        assert!(!store.is_registered(&event, "ada@x.com").await.unwrap());
        assert!(store.list_registrations(&event).await.unwrap().is_empty());
        assert_eq!(store.delete_all_registrations(&event).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_before_provisioning_fails() {
        let (store, event) = store_with_event("Kickoff").await;
        let err = store
            .insert_registration(&event, "Ada", "ada@x.com", "dG9rZW4=")
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::TableMissing(table) if table == table_name_for(&event)));
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_conflict() {
        let (store, event) = store_with_event("Kickoff").await;
        store.ensure_table(&event).await.unwrap();
        store
            .insert_registration(&event, "Ada", "ada@x.com", "dG9rZW4x")
            .await
            .unwrap();
        let err = store
            .insert_registration(&event, "Ada L.", "ada@x.com", "dG9rZW4y")
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::DuplicateEmail));
        assert_eq!(store.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_same_email_may_register_for_different_events() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let first = store.create_event(new_event("One"), owner).await.unwrap();
        let second = store.create_event(new_event("Two"), owner).await.unwrap();
        for event in [&first, &second] {
            store.ensure_table(event).await.unwrap();
            store
                .insert_registration(event, "Ada", "ada@x.com", "dG9rZW4=")
                .await
                .unwrap();
        }
        assert_eq!(store.registration_count(), 2);
    }

    #[tokio::test]
    async fn test_find_by_token_returns_first_candidate_match() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let first = store.create_event(new_event("One"), owner).await.unwrap();
        let second = store.create_event(new_event("Two"), owner).await.unwrap();
        store.ensure_table(&second).await.unwrap();
        let registration = store
            .insert_registration(&second, "Ada", "ada@x.com", "dG9rZW4=")
            .await
            .unwrap();

        let (event, found) = store
            .find_by_token(&[first.clone(), second.clone()], "dG9rZW4=")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.id, second.id);
        assert_eq!(found, registration);

        assert!(store
            .find_by_token(&[first], "dG9rZW4=")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_check_in_happens_once() {
        let (store, event) = store_with_event("Kickoff").await;
        store.ensure_table(&event).await.unwrap();
        let registration = store
            .insert_registration(&event, "Ada", "ada@x.com", "dG9rZW4=")
            .await
            .unwrap();

        let first_at = Utc::now();
        let CheckInOutcome::CheckedIn(checked) = store
            .mark_checked_in(&event, registration.id, first_at)
            .await
            .unwrap()
        else {
            panic!("first check-in should succeed");
        };
        assert!(checked.checked_in);
        assert_eq!(checked.check_in_time, Some(first_at));

        let later = first_at + chrono::Duration::minutes(5);
        let CheckInOutcome::AlreadyCheckedIn(again) = store
            .mark_checked_in(&event, registration.id, later)
            .await
            .unwrap()
        else {
            panic!("second check-in should report already checked in");
        };
        assert_eq!(again.check_in_time, Some(first_at));

        assert_eq!(
            store
                .mark_checked_in(&event, Uuid::new_v4(), later)
                .await
                .unwrap(),
            CheckInOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_event_removes_registrations_then_event() {
        let (store, event) = store_with_event("Kickoff").await;
        store.ensure_table(&event).await.unwrap();
        store
            .insert_registration(&event, "Ada", "ada@x.com", "dG9rZW4=")
            .await
            .unwrap();

        store.delete_event(&event).await.unwrap();
        assert_eq!(store.registration_count(), 0);
        assert!(store.find_event(event.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_event(&event).await,
            Err(DeletionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_events_is_newest_first() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let older = store.create_event(new_event("Older"), owner).await.unwrap();
        let newer = store.create_event(new_event("Newer"), owner).await.unwrap();
        let ids: Vec<Uuid> = store
            .list_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
