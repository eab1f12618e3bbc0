//! The match-hosting service a squad hands off to.
//!
//! Squadforge does not run matches. It talks to a separate service that
//! owns many concurrent match instances through the [`MatchHost`] trait.
//! None of the calls are transactional: two squads may race to create an
//! instance, and a reservation can fail after others succeeded.
//!
//! [`InMemoryMatchHost`] is a local stand-in with capacity-bounded
//! instances and fault injection, used by tests and the demo.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use squadforge_protocol::{MatchInstanceId, SeatReservation};
use tokio::sync::Mutex;

use crate::token::generate_token;

/// Errors reported by a match host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The service could not be reached or timed out.
    #[error("match host unavailable: {0}")]
    Unavailable(String),

    /// The instance has no free seat left.
    #[error("match instance {0} is full")]
    InstanceFull(MatchInstanceId),

    /// The service refused the request.
    #[error("match host rejected request: {0}")]
    Rejected(String),
}

/// A match instance as the host describes it at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInstance {
    pub id: MatchInstanceId,
    pub match_type: String,
    pub capacity: usize,
    pub reserved: usize,
}

impl MatchInstance {
    pub fn free_seats(&self) -> usize {
        self.capacity.saturating_sub(self.reserved)
    }
}

/// Constraints for [`MatchHost::find_available_instance`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    /// Only instances with at least this many free seats qualify.
    pub min_free_seats: usize,
}

/// Options for [`MatchHost::create_instance`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceOptions {
    /// Seat count; `None` lets the host pick its default.
    pub capacity: Option<usize>,
}

/// Member data carried into the match with the reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSettings {
    pub name: String,
}

/// Consumed interface of the match-hosting service.
///
/// Methods return `Send` futures so a squad can drive a handoff from a
/// spawned task. Implementors can simply write `async fn`.
pub trait MatchHost: Send + Sync + 'static {
    /// Returns an instance of `match_type` matching `filter`, if any.
    fn find_available_instance(
        &self,
        match_type: &str,
        filter: &InstanceFilter,
    ) -> impl Future<Output = Result<Option<MatchInstance>, HostError>> + Send;

    /// Creates a new, empty instance.
    fn create_instance(
        &self,
        match_type: &str,
        options: &InstanceOptions,
    ) -> impl Future<Output = Result<MatchInstance, HostError>> + Send;

    /// Holds one seat in `instance` for a member.
    fn reserve_seat(
        &self,
        instance: &MatchInstance,
        settings: &MemberSettings,
    ) -> impl Future<Output = Result<SeatReservation, HostError>> + Send;

    /// Gives a held seat back. Releasing an unknown seat is not an error.
    fn release_seat(
        &self,
        reservation: &SeatReservation,
    ) -> impl Future<Output = Result<(), HostError>> + Send;
}

// ---------------------------------------------------------------------------
// InMemoryMatchHost
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 16;
const DEFAULT_EXPIRY: Duration = Duration::from_secs(30);

struct InstanceRecord {
    match_type: String,
    capacity: usize,
    /// Seat token → holder.
    seats: HashMap<String, MemberSettings>,
}

impl InstanceRecord {
    fn describe(&self, id: MatchInstanceId) -> MatchInstance {
        MatchInstance {
            id,
            match_type: self.match_type.clone(),
            capacity: self.capacity,
            reserved: self.seats.len(),
        }
    }
}

#[derive(Default)]
struct HostInner {
    instances: HashMap<MatchInstanceId, InstanceRecord>,
    next_id: u64,
    failing_reservations: u32,
    rejected_names: Vec<String>,
}

/// Match host kept entirely in memory.
pub struct InMemoryMatchHost {
    inner: Mutex<HostInner>,
    capacity: usize,
    expiry: Duration,
}

impl InMemoryMatchHost {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HostInner {
                next_id: 1,
                ..HostInner::default()
            }),
            capacity: DEFAULT_CAPACITY,
            expiry: DEFAULT_EXPIRY,
        }
    }

    /// Seats per newly created instance.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// How long granted seats are held.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// The next `count` reservation attempts fail with `Unavailable`.
    pub async fn fail_next_reservations(&self, count: u32) {
        self.inner.lock().await.failing_reservations = count;
    }

    /// Every reservation for a member with this display name is rejected.
    pub async fn reject_member(&self, name: impl Into<String>) {
        self.inner.lock().await.rejected_names.push(name.into());
    }

    pub async fn instance_count(&self) -> usize {
        self.inner.lock().await.instances.len()
    }

    /// Seats currently held across all instances.
    pub async fn reserved_seats(&self) -> usize {
        self.inner
            .lock()
            .await
            .instances
            .values()
            .map(|i| i.seats.len())
            .sum()
    }

    /// Display names holding seats in `instance`, sorted.
    pub async fn seat_holders(&self, instance: MatchInstanceId) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner
            .instances
            .get(&instance)
            .map(|i| i.seats.values().map(|s| s.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for InMemoryMatchHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchHost for InMemoryMatchHost {
    async fn find_available_instance(
        &self,
        match_type: &str,
        filter: &InstanceFilter,
    ) -> Result<Option<MatchInstance>, HostError> {
        let inner = self.inner.lock().await;
        let found = inner
            .instances
            .iter()
            .filter(|(_, record)| record.match_type == match_type)
            .map(|(id, record)| record.describe(*id))
            .filter(|instance| instance.free_seats() >= filter.min_free_seats)
            .min_by_key(|instance| instance.id.0);
        Ok(found)
    }

    async fn create_instance(
        &self,
        match_type: &str,
        options: &InstanceOptions,
    ) -> Result<MatchInstance, HostError> {
        let mut inner = self.inner.lock().await;
        let id = MatchInstanceId(inner.next_id);
        inner.next_id += 1;
        let record = InstanceRecord {
            match_type: match_type.to_string(),
            capacity: options.capacity.unwrap_or(self.capacity),
            seats: HashMap::new(),
        };
        let instance = record.describe(id);
        inner.instances.insert(id, record);
        tracing::debug!(instance_id = %id, match_type, "match instance created");
        Ok(instance)
    }

    async fn reserve_seat(
        &self,
        instance: &MatchInstance,
        settings: &MemberSettings,
    ) -> Result<SeatReservation, HostError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_reservations > 0 {
            inner.failing_reservations -= 1;
            return Err(HostError::Unavailable("injected failure".into()));
        }
        if inner.rejected_names.contains(&settings.name) {
            return Err(HostError::Rejected(format!(
                "member {} is not allowed",
                settings.name
            )));
        }

        let record = inner
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| HostError::Rejected(format!("unknown instance {}", instance.id)))?;
        if record.seats.len() >= record.capacity {
            return Err(HostError::InstanceFull(instance.id));
        }

        let seat_token = generate_token();
        record.seats.insert(seat_token.clone(), settings.clone());
        Ok(SeatReservation {
            match_instance_id: instance.id,
            seat_token,
            expiry: self.expiry.as_secs(),
        })
    }

    async fn release_seat(&self, reservation: &SeatReservation) -> Result<(), HostError> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.instances.get_mut(&reservation.match_instance_id) {
            record.seats.remove(&reservation.seat_token);
        }
        Ok(())
    }
}
