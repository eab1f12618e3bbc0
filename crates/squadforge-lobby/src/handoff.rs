//! Match handoff: find-or-create an instance, then reserve every seat.
//!
//! The handoff is reserve-all-then-commit. Seats are requested one member
//! at a time and nothing is delivered to clients here; the squad actor
//! commits (flips `started`, delivers reservations) only when every seat was
//! granted. If any step exhausts its retries, every seat granted so far is
//! released before the failure is reported, so a failed start never leaves
//! a member holding a seat.
//!
//! An instance can fill up between lookup and reservation when another
//! squad gets there first. Retrying the same instance cannot help, so a
//! full instance costs one retry: the seats granted so far are released and
//! the whole squad is placed again on a freshly located instance.

use std::future::Future;
use std::time::Duration;

use squadforge_protocol::{MemberId, SeatReservation};

use crate::{HostError, InstanceFilter, InstanceOptions, MatchHost, MatchInstance, MemberSettings, SquadConfig};

/// One seat to reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatRequest {
    pub member: MemberId,
    pub settings: MemberSettings,
}

/// Everything a handoff needs, captured when the owner's start passed its
/// guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPlan {
    pub match_type: String,
    pub seats: Vec<SeatRequest>,
}

/// Bounded retry for each host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub backoff: Duration,
}

impl From<&SquadConfig> for RetryPolicy {
    fn from(config: &SquadConfig) -> Self {
        Self {
            retries: config.reservation_retries,
            backoff: config.retry_backoff,
        }
    }
}

/// Why a handoff was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffFailure {
    #[error("no match instance available: {0}")]
    NoInstance(HostError),

    /// A seat could not be reserved; `released` seats were handed back.
    #[error("seat reservation for member {member} failed: {source}")]
    Seat {
        member: MemberId,
        source: HostError,
        released: usize,
    },
}

/// Granted seats in plan order, or the reason nothing was granted.
pub type HandoffOutcome = Result<Vec<(MemberId, SeatReservation)>, HandoffFailure>;

/// Runs a full handoff against `host`.
pub async fn hand_off<H: MatchHost>(host: &H, plan: &HandoffPlan, retry: &RetryPolicy) -> HandoffOutcome {
    let mut relocations = 0;
    loop {
        let instance = with_retry(retry, || locate_instance(host, plan))
            .await
            .map_err(HandoffFailure::NoInstance)?;
        tracing::info!(
            instance_id = %instance.id,
            seats = plan.seats.len(),
            "reserving seats"
        );

        let (granted, failed) = reserve_all(host, plan, &instance, retry).await;
        let Some((member, source)) = failed else {
            return Ok(granted);
        };

        let released = release_all(host, &granted).await;
        if matches!(source, HostError::InstanceFull(_)) && relocations < retry.retries {
            relocations += 1;
            tracing::debug!(
                instance_id = %instance.id,
                released,
                relocations,
                "instance filled up, placing squad again"
            );
            continue;
        }

        tracing::warn!(
            member_id = %member,
            error = %source,
            released,
            "seat reservation exhausted retries, handoff rolled back"
        );
        return Err(HandoffFailure::Seat {
            member,
            source,
            released,
        });
    }
}

/// Reserves seats in plan order and stops at the first seat that fails.
async fn reserve_all<H: MatchHost>(
    host: &H,
    plan: &HandoffPlan,
    instance: &MatchInstance,
    retry: &RetryPolicy,
) -> (Vec<(MemberId, SeatReservation)>, Option<(MemberId, HostError)>) {
    let mut granted = Vec::with_capacity(plan.seats.len());
    for seat in &plan.seats {
        match with_retry(retry, || host.reserve_seat(instance, &seat.settings)).await {
            Ok(reservation) => granted.push((seat.member, reservation)),
            Err(source) => return (granted, Some((seat.member, source))),
        }
    }
    (granted, None)
}

/// Find-or-create. Two squads racing here may both create an instance;
/// instances are elastic, so that is acceptable.
async fn locate_instance<H: MatchHost>(host: &H, plan: &HandoffPlan) -> Result<MatchInstance, HostError> {
    let filter = InstanceFilter {
        min_free_seats: plan.seats.len(),
    };
    match host.find_available_instance(&plan.match_type, &filter).await? {
        Some(instance) => Ok(instance),
        None => {
            host.create_instance(&plan.match_type, &InstanceOptions::default())
                .await
        }
    }
}

async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, HostError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HostError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            // Same instance, same answer.
            Err(e @ HostError::InstanceFull(_)) => return Err(e),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                tracing::debug!(error = %e, attempt, "match host call failed, retrying");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Hands every granted seat back. Returns how many the host accepted.
pub(crate) async fn release_all<H: MatchHost>(host: &H, granted: &[(MemberId, SeatReservation)]) -> usize {
    let mut released = 0;
    for (member, reservation) in granted {
        match host.release_seat(reservation).await {
            Ok(()) => released += 1,
            Err(e) => {
                tracing::warn!(member_id = %member, error = %e, "failed to release seat");
            }
        }
    }
    released
}
