use std::sync::Arc;

use crate::attendance::{AttendanceGateway, EventRepository, InMemoryStore};
use crate::checkin::CheckInService;
use crate::notify::Notifier;
use crate::registration::RegistrationService;

/// Shared handles for request handlers. Everything inside is reference
/// counted, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<dyn EventRepository>,
    pub attendance: Arc<dyn AttendanceGateway>,
    pub registrations: RegistrationService,
    pub checkin: CheckInService,
}

impl AppState {
    pub fn new(
        events: Arc<dyn EventRepository>,
        attendance: Arc<dyn AttendanceGateway>,
        notifier: Arc<dyn Notifier>,
        public_base_url: &str,
    ) -> Self {
        Self {
            registrations: RegistrationService::new(
                events.clone(),
                attendance.clone(),
                notifier,
                public_base_url,
            ),
            checkin: CheckInService::new(events.clone(), attendance.clone()),
            events,
            attendance,
        }
    }

    /// State over a single in-memory store.
    pub fn in_memory(
        store: InMemoryStore,
        notifier: Arc<dyn Notifier>,
        public_base_url: &str,
    ) -> Self {
        Self::new(
            Arc::new(store.clone()),
            Arc::new(store),
            notifier,
            public_base_url,
        )
    }
}
