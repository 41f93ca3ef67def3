//! Storage seams for providers and appointments, with in-memory
//! implementations for tests and offline use.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::calendar::Provider;
use crate::error::StorageError;
use crate::models::{Appointment, AppointmentId, AppointmentPatch};

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StorageError>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn get(&self, id: AppointmentId) -> Result<Option<Appointment>, StorageError>;

    /// Every appointment of the provider, in any status, whose interval
    /// intersects `[start, end)`, ordered by start.
    async fn list_by_provider_and_range(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StorageError>;

    async fn insert(&self, appointment: Appointment) -> Result<(), StorageError>;

    /// Apply `patch` and return the updated record, or `None` if the id is
    /// unknown.
    async fn update(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryProviderRepository {
    providers: RwLock<HashMap<String, Provider>>,
}

impl InMemoryProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, provider: Provider) {
        self.providers
            .write()
            .await
            .insert(provider.id.clone(), provider);
    }

    pub async fn remove(&self, provider_id: &str) -> Option<Provider> {
        self.providers.write().await.remove(provider_id)
    }
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, StorageError> {
        Ok(self.providers.read().await.get(provider_id).cloned())
    }
}

#[derive(Default)]
struct ProviderIndex {
    by_start: BTreeSet<(DateTime<Utc>, AppointmentId)>,
    longest_minutes: u32,
}

#[derive(Default)]
struct AppointmentStore {
    records: HashMap<AppointmentId, Appointment>,
    by_provider: HashMap<String, ProviderIndex>,
}

/// Arena of appointment records keyed by id, with a per-provider start-time
/// index for range scans.
#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    store: RwLock<AppointmentStore>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every appointment of the provider, ordered by start.
    pub async fn list_by_provider(&self, provider_id: &str) -> Vec<Appointment> {
        let store = self.store.read().await;
        match store.by_provider.get(provider_id) {
            Some(index) => index
                .by_start
                .iter()
                .filter_map(|(_, id)| store.records.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn get(&self, id: AppointmentId) -> Result<Option<Appointment>, StorageError> {
        Ok(self.store.read().await.records.get(&id).cloned())
    }

    async fn list_by_provider_and_range(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StorageError> {
        let store = self.store.read().await;
        let index = match store.by_provider.get(provider_id) {
            Some(index) => index,
            None => return Ok(Vec::new()),
        };
        if end <= start {
            return Ok(Vec::new());
        }

        // Nothing starting before this can still be running at `start`.
        let scan_from = start
            .checked_sub_signed(Duration::minutes(i64::from(index.longest_minutes)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let appointments = index
            .by_start
            .range((scan_from, Uuid::nil())..(end, Uuid::nil()))
            .filter_map(|(_, id)| store.records.get(id))
            .filter(|appointment| appointment.interval().end > start)
            .cloned()
            .collect();
        Ok(appointments)
    }

    async fn insert(&self, appointment: Appointment) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        if store.records.contains_key(&appointment.id) {
            return Err(StorageError::Duplicate(appointment.id.to_string()));
        }
        let index = store
            .by_provider
            .entry(appointment.provider_id.clone())
            .or_default();
        index.by_start.insert((appointment.date_time, appointment.id));
        index.longest_minutes = index.longest_minutes.max(appointment.duration_minutes);
        store.records.insert(appointment.id, appointment);
        Ok(())
    }

    async fn update(
        &self,
        id: AppointmentId,
        patch: AppointmentPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StorageError> {
        let mut store = self.store.write().await;
        let AppointmentStore {
            records,
            by_provider,
        } = &mut *store;

        let appointment = match records.get_mut(&id) {
            Some(appointment) => appointment,
            None => return Ok(None),
        };

        let previous_start = appointment.date_time;
        appointment.apply(&patch, updated_at);

        if appointment.date_time != previous_start {
            if let Some(index) = by_provider.get_mut(&appointment.provider_id) {
                index.by_start.remove(&(previous_start, id));
                index.by_start.insert((appointment.date_time, id));
            }
        }

        Ok(Some(appointment.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, BookingRequest};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, day, hour, minute, 0).unwrap()
    }

    fn appointment(provider: &str, start: DateTime<Utc>, minutes: u32) -> Appointment {
        Appointment::from_request(
            BookingRequest::new(provider, "client-1", start).with_duration(minutes),
            at(1, 0, 0),
        )
    }

    #[tokio::test]
    async fn range_scan_returns_intersecting_appointments_only() {
        let repo = InMemoryAppointmentRepository::new();
        let early = appointment("p1", at(7, 8, 0), 60);
        let spans_midnight = appointment("p1", at(6, 23, 30), 60);
        let next_day = appointment("p1", at(8, 9, 0), 60);
        let other_provider = appointment("p2", at(7, 9, 0), 60);
        for a in [&early, &spans_midnight, &next_day, &other_provider] {
            repo.insert(a.clone()).await.unwrap();
        }

        let found = repo
            .list_by_provider_and_range("p1", at(7, 0, 0), at(8, 0, 0))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![spans_midnight.id, early.id]);
    }

    #[tokio::test]
    async fn touching_range_end_is_excluded() {
        let repo = InMemoryAppointmentRepository::new();
        repo.insert(appointment("p1", at(7, 10, 0), 60)).await.unwrap();

        let before = repo
            .list_by_provider_and_range("p1", at(7, 9, 0), at(7, 10, 0))
            .await
            .unwrap();
        let after = repo
            .list_by_provider_and_range("p1", at(7, 11, 0), at(7, 12, 0))
            .await
            .unwrap();
        assert!(before.is_empty());
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let repo = InMemoryAppointmentRepository::new();
        let a = appointment("p1", at(7, 10, 0), 60);
        repo.insert(a.clone()).await.unwrap();
        assert!(matches!(
            repo.insert(a).await,
            Err(StorageError::Duplicate(_))
        ));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn update_moves_the_index_entry() {
        let repo = InMemoryAppointmentRepository::new();
        let a = appointment("p1", at(7, 10, 0), 60);
        repo.insert(a.clone()).await.unwrap();

        let patch = AppointmentPatch {
            date_time: Some(at(9, 14, 0)),
            status: Some(AppointmentStatus::Pending),
            ..Default::default()
        };
        let updated = repo.update(a.id, patch, at(2, 0, 0)).await.unwrap().unwrap();
        assert_eq!(updated.date_time, at(9, 14, 0));

        let old_day = repo
            .list_by_provider_and_range("p1", at(7, 0, 0), at(8, 0, 0))
            .await
            .unwrap();
        let new_day = repo
            .list_by_provider_and_range("p1", at(9, 0, 0), at(10, 0, 0))
            .await
            .unwrap();
        assert!(old_day.is_empty());
        assert_eq!(new_day.len(), 1);
        assert_eq!(repo.list_by_provider("p1").await.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_id_returns_none() {
        let repo = InMemoryAppointmentRepository::new();
        let result = repo
            .update(Uuid::new_v4(), AppointmentPatch::default(), at(1, 0, 0))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn provider_lookup_and_removal() {
        let repo = InMemoryProviderRepository::new();
        let provider = Provider::new("p1", "Dr. Lane", 0, Default::default()).unwrap();
        repo.upsert(provider.clone()).await;
        assert_eq!(repo.get_provider("p1").await.unwrap(), Some(provider));
        assert!(repo.remove("p1").await.is_some());
        assert_eq!(repo.get_provider("p1").await.unwrap(), None);
    }
}
