use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    table_name_for, AttendanceGateway, AttendanceLayout, CheckInOutcome, DeletionError,
    EventRepository, InsertError, ProvisionError, StoreError, SHARED_TABLE,
};
use crate::models::{Event, NewEvent, Registration};

const REGISTRATION_COLUMNS: &str =
    "id, event_id, name, email, token, registered_at, checked_in, check_in_time";
const EVENT_COLUMNS: &str =
    "id, title, description, location, event_date, event_time, created_at, created_by";

const UNDEFINED_TABLE: &str = "42P01";
const DUPLICATE_TABLE: &str = "42P07";

/// The only holder of the admin connection. Creating attendance tables and
/// granting access to them requires privileges that request handling must
/// not have, so this runs `provision_attendance_table` (a SECURITY DEFINER
/// function) on a separate pool.
#[derive(Clone)]
pub struct Provisioner {
    admin_pool: PgPool,
}

impl Provisioner {
    pub fn new(admin_pool: PgPool) -> Self {
        Self { admin_pool }
    }

    async fn provision(&self, table: &str, event_id: Uuid) -> Result<(), ProvisionError> {
        let result = sqlx::query("SELECT provision_attendance_table($1, $2)")
            .bind(table)
            .bind(event_id)
            .execute(&self.admin_pool)
            .await;

        match result {
            Ok(_) => {
                info!(table, %event_id, "Attendance table provisioned");
                Ok(())
            }
            // A concurrent first registrant created it between our check and
            // our call.
            Err(e) if is_creation_race(&e) => {
                debug!(table, "Attendance table created concurrently");
                Ok(())
            }
            Err(e) => Err(ProvisionError::Storage(e)),
        }
    }

    pub async fn close(&self) {
        self.admin_pool.close().await;
    }
}

/// Postgres-backed events and attendance.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    provisioner: Provisioner,
    layout: AttendanceLayout,
}

impl PgStore {
    pub fn new(pool: PgPool, provisioner: Provisioner, layout: AttendanceLayout) -> Self {
        Self {
            pool,
            provisioner,
            layout,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        self.provisioner.close().await;
    }

    fn table_name(&self, event: &Event) -> String {
        match self.layout {
            AttendanceLayout::Partitioned => SHARED_TABLE.to_string(),
            AttendanceLayout::TablePerEvent => table_name_for(event),
        }
    }

    /// Quoted relation name for interpolation into SQL text.
    fn relation(&self, event: &Event) -> String {
        quote_ident(&self.table_name(event))
    }

    async fn table_exists(&self, table: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass(quote_ident($1)) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl EventRepository for PgStore {
    async fn create_event(&self, new: NewEvent, created_by: Uuid) -> Result<Event, StoreError> {
        let sql = format!(
            "INSERT INTO events (title, description, location, event_date, event_time, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {EVENT_COLUMNS}"
        );
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(new.title.trim())
            .bind(new.description.as_deref())
            .bind(new.location.trim())
            .bind(new.event_date)
            .bind(new.event_time)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY created_at DESC, id");
        let events = sqlx::query_as::<_, Event>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }
}

#[async_trait]
impl AttendanceGateway for PgStore {
    async fn ensure_table(&self, event: &Event) -> Result<(), ProvisionError> {
        if self.layout == AttendanceLayout::Partitioned {
            return Ok(());
        }

        let table = table_name_for(event);
        if self.table_exists(&table).await? {
            return Ok(());
        }
        self.provisioner.provision(&table, event.id).await
    }

    async fn insert_registration(
        &self,
        event: &Event,
        name: &str,
        email: &str,
        token: &str,
    ) -> Result<Registration, InsertError> {
        let sql = format!(
            "INSERT INTO {} (event_id, name, email, token) VALUES ($1, $2, $3, $4) \
             RETURNING {REGISTRATION_COLUMNS}",
            self.relation(event)
        );
        sqlx::query_as::<_, Registration>(&sql)
            .bind(event.id)
            .bind(name)
            .bind(email)
            .bind(token)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_unique_violation() {
                        return InsertError::DuplicateEmail;
                    }
                }
                if is_undefined_table(&e) {
                    return InsertError::TableMissing(self.table_name(event));
                }
                InsertError::Persist(e)
            })
    }

    async fn is_registered(&self, event: &Event, email: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE event_id = $1 AND email = $2)",
            self.relation(event)
        );
        let result = sqlx::query_scalar::<_, bool>(&sql)
            .bind(event.id)
            .bind(email)
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(found) => Ok(found),
            Err(e) if is_undefined_table(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_registration(
        &self,
        event: &Event,
        id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM {} WHERE event_id = $1 AND id = $2",
            self.relation(event)
        );
        let result = sqlx::query_as::<_, Registration>(&sql)
            .bind(event.id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        absent_table_is_empty(result)
    }

    async fn find_registration_by_token(
        &self,
        event: &Event,
        token: &str,
    ) -> Result<Option<Registration>, StoreError> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM {} WHERE event_id = $1 AND token = $2",
            self.relation(event)
        );
        let result = sqlx::query_as::<_, Registration>(&sql)
            .bind(event.id)
            .bind(token)
            .fetch_optional(&self.pool)
            .await;
        absent_table_is_empty(result)
    }

    async fn list_registrations(&self, event: &Event) -> Result<Vec<Registration>, StoreError> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM {} WHERE event_id = $1 ORDER BY registered_at, id",
            self.relation(event)
        );
        let result = sqlx::query_as::<_, Registration>(&sql)
            .bind(event.id)
            .fetch_all(&self.pool)
            .await;
        match result {
            Ok(rows) => Ok(rows),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_checked_in(
        &self,
        event: &Event,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CheckInOutcome, StoreError> {
        let sql = format!(
            "UPDATE {} SET checked_in = TRUE, check_in_time = $3 \
             WHERE event_id = $1 AND id = $2 AND NOT checked_in \
             RETURNING {REGISTRATION_COLUMNS}",
            self.relation(event)
        );
        let result = sqlx::query_as::<_, Registration>(&sql)
            .bind(event.id)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await;

        match absent_table_is_empty(result)? {
            Some(registration) => Ok(CheckInOutcome::CheckedIn(registration)),
            None => Ok(match self.find_registration(event, id).await? {
                Some(existing) => CheckInOutcome::AlreadyCheckedIn(existing),
                None => CheckInOutcome::NotFound,
            }),
        }
    }

    async fn delete_all_registrations(&self, event: &Event) -> Result<u64, DeletionError> {
        let sql = format!("DELETE FROM {} WHERE event_id = $1", self.relation(event));
        match sqlx::query(&sql).bind(event.id).execute(&self.pool).await {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) if is_undefined_table(&e) => Ok(0),
            Err(e) => Err(DeletionError::Registrations(e)),
        }
    }

    async fn delete_event(&self, event: &Event) -> Result<(), DeletionError> {
        let table = self.table_name(event);
        // Checked up front: a failed statement would abort the transaction.
        let has_table = self
            .table_exists(&table)
            .await
            .map_err(DeletionError::Registrations)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(DeletionError::Registrations)?;

        let removed = if has_table {
            let sql = format!("DELETE FROM {} WHERE event_id = $1", quote_ident(&table));
            sqlx::query(&sql)
                .bind(event.id)
                .execute(&mut *tx)
                .await
                .map_err(DeletionError::Registrations)?
                .rows_affected()
        } else {
            0
        };

        let deleted = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event.id)
            .execute(&mut *tx)
            .await
            .map_err(DeletionError::Event)?
            .rows_affected();
        if deleted == 0 {
            // Dropping `tx` rolls the registration phase back.
            warn!(event_id = %event.id, "Event vanished before deletion");
            return Err(DeletionError::NotFound);
        }

        tx.commit().await.map_err(DeletionError::Event)?;
        info!(event_id = %event.id, removed, "Event and registrations deleted");
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn is_undefined_table(e: &sqlx::Error) -> bool {
    sqlstate(e).as_deref() == Some(UNDEFINED_TABLE)
}

fn is_creation_race(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.code().as_deref() == Some(DUPLICATE_TABLE)
        }
        _ => false,
    }
}

fn absent_table_is_empty<T>(
    result: Result<Option<T>, sqlx::Error>,
) -> Result<Option<T>, StoreError> {
    match result {
        Ok(row) => Ok(row),
        Err(e) if is_undefined_table(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
