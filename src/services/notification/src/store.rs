//! In-memory notification store
//!
//! The authoritative record of every notification's lifecycle. All status
//! changes go through `transition`, a per-id compare-and-set against the
//! current status: the expected-from check serialises competing writers (a
//! worker racing a cancel, for example) and the transition table rejects
//! revival of terminal records. An external-id index supports provider-side
//! lookups once a send has been accepted upstream.

use chrono::Utc;
use courier_shared::{Notification, NotificationStatus};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Concurrent notification store with an external-id index
pub struct NotificationStore {
    records: DashMap<Uuid, Notification>,
    external_index: DashMap<String, Uuid>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            external_index: DashMap::new(),
        }
    }

    /// Insert a new record
    pub fn create(&self, notification: Notification) -> Result<()> {
        match self.records.entry(notification.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::conflict(format!(
                "notification {} already exists",
                notification.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(notification);
                Ok(())
            }
        }
    }

    /// Compare-and-set status transition. Fails with Conflict when the
    /// current status is not `expected_from` or the transition table forbids
    /// `expected_from -> to`. `mutate` runs under the entry lock before the
    /// status flips, so counter bumps and error notes land atomically with
    /// the transition.
    pub fn transition<F>(
        &self,
        id: Uuid,
        expected_from: NotificationStatus,
        to: NotificationStatus,
        mutate: F,
    ) -> Result<Notification>
    where
        F: FnOnce(&mut Notification),
    {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("notification {}", id)))?;

        if entry.status != expected_from {
            return Err(EngineError::conflict(format!(
                "notification {} is {}, expected {}",
                id, entry.status, expected_from
            )));
        }
        if !expected_from.can_transition_to(to) {
            return Err(EngineError::conflict(format!(
                "transition {} -> {} is not allowed",
                expected_from, to
            )));
        }

        mutate(&mut entry);
        entry.status = to;
        entry.updated_at = Utc::now();

        if let Some(external_id) = entry.external_id.clone() {
            self.external_index.insert(external_id, id);
        }

        Ok(entry.clone())
    }

    /// Attach the provider-assigned id; only legal on a sent record
    pub fn set_external_id(&self, id: Uuid, external_id: String) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("notification {}", id)))?;

        if !matches!(
            entry.status,
            NotificationStatus::Sent | NotificationStatus::Delivered
        ) {
            return Err(EngineError::conflict(format!(
                "external id can only be set on a sent notification, {} is {}",
                id, entry.status
            )));
        }

        entry.external_id = Some(external_id.clone());
        entry.updated_at = Utc::now();
        self.external_index.insert(external_id, id);
        Ok(())
    }

    /// Count a manual retry attempt against a record. Legal on Pending
    /// (redispatch ahead of schedule) and Failed (revive, Failed -> Pending);
    /// everything else conflicts. Enforces `retry_count < max_retries`.
    pub fn record_manual_retry(&self, id: Uuid, reason: &str) -> Result<Notification> {
        let mut entry = self
            .records
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("notification {}", id)))?;

        match entry.status {
            NotificationStatus::Pending | NotificationStatus::Failed => {}
            NotificationStatus::Sending => {
                return Err(EngineError::conflict(format!(
                    "notification {} has a delivery in flight",
                    id
                )));
            }
            status => {
                return Err(EngineError::conflict(format!(
                    "notification {} is already {}",
                    id, status
                )));
            }
        }
        if entry.retry_count >= entry.retry_policy.max_retries {
            return Err(EngineError::conflict(format!(
                "notification {} has exhausted its {} retries",
                id, entry.retry_policy.max_retries
            )));
        }

        entry.retry_count += 1;
        entry.last_error = Some(format!("manual retry: {}", reason));
        entry.status = NotificationStatus::Pending;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn find(&self, id: Uuid) -> Option<Notification> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<Notification> {
        let id = *self.external_index.get(external_id)?;
        self.find(id)
    }

    /// List records newest-first with optional status filter. Returns the
    /// page plus the total count of matching records.
    pub fn list(
        &self,
        status: Option<NotificationStatus>,
        page: u32,
        limit: u32,
    ) -> (Vec<Notification>, u64) {
        let mut matching: Vec<Notification> = self
            .records
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let page = page.max(1);
        // Widen before multiplying: a huge page number must yield an empty
        // page, not an overflow.
        let offset = (page as u64 - 1).saturating_mul(limit as u64) as usize;
        let page_items = matching
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();
        (page_items, total)
    }

    /// Count records currently in the given status
    pub fn count_with_status(&self, status: NotificationStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Total records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}
