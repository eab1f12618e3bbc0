//! Squad manager: opens squads, tracks which member is in which squad, and
//! routes member traffic to the right actor.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use squadforge_protocol::{ClientIntent, MemberId, SquadId, SquadView};

use crate::room::spawn_squad;
use crate::{ClientSender, JoinTicket, MatchHost, SquadConfig, SquadError, SquadHandle, SquadInfo};

/// Counter for generating unique squad IDs.
static NEXT_SQUAD_ID: AtomicU64 = AtomicU64::new(1);

/// Owns every live squad of one process.
///
/// A member belongs to at most one squad. The member index can lag behind
/// an actor (a member removed by grace expiry is still indexed here), so
/// an index entry is confirmed against the actor before it blocks a join.
pub struct SquadManager<H: MatchHost> {
    host: Arc<H>,
    config: SquadConfig,
    squads: HashMap<SquadId, SquadHandle>,
    member_squads: HashMap<MemberId, SquadId>,
}

impl<H: MatchHost> SquadManager<H> {
    /// Every squad opened by this manager uses `config` and hands off to
    /// `host`.
    pub fn new(host: Arc<H>, config: SquadConfig) -> Self {
        Self {
            host,
            config,
            squads: HashMap::new(),
            member_squads: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SquadConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Spawns an empty squad and returns its ID.
    pub fn create_squad(&mut self) -> SquadId {
        let squad_id = SquadId(NEXT_SQUAD_ID.fetch_add(1, Ordering::Relaxed));
        let handle = spawn_squad(squad_id, self.config.clone(), Arc::clone(&self.host));
        self.squads.insert(squad_id, handle);
        tracing::info!(%squad_id, "squad created");
        squad_id
    }

    /// Adds `member` to `squad` with `sender` as its connection.
    pub async fn join(
        &mut self,
        member: MemberId,
        squad: SquadId,
        name: Option<String>,
        sender: ClientSender,
    ) -> Result<JoinTicket, SquadError> {
        if let Some(current) = self.member_squads.get(&member).copied() {
            if self.still_member(current, member).await {
                return Err(if current == squad {
                    SquadError::AlreadyJoined(member)
                } else {
                    SquadError::AlreadyInSquad(member, current)
                });
            }
            self.member_squads.remove(&member);
        }

        let handle = self.squads.get(&squad).ok_or(SquadError::NotFound(squad))?;
        let ticket = handle.join(member, name, sender).await?;
        self.member_squads.insert(member, squad);
        Ok(ticket)
    }

    /// Forwards a client intent to the member's squad.
    pub async fn route(&self, member: MemberId, intent: ClientIntent) -> Result<(), SquadError> {
        self.handle_of(member)?.submit(member, intent).await
    }

    /// Removes (consented) or detaches (unconsented) a member.
    pub async fn leave(&mut self, member: MemberId, consented: bool) -> Result<(), SquadError> {
        let result = self.handle_of(member)?.leave(member, consented).await;

        if consented || matches!(result, Err(SquadError::Unavailable(_))) {
            self.member_squads.remove(&member);
        }
        match result {
            Err(SquadError::Unavailable(_)) => Ok(()),
            other => other,
        }
    }

    /// Reattaches a member to `squad` by reconnect token.
    pub async fn reconnect(
        &mut self,
        squad: SquadId,
        token: &str,
        sender: ClientSender,
    ) -> Result<MemberId, SquadError> {
        let handle = self.squads.get(&squad).ok_or(SquadError::NotFound(squad))?;
        let member = handle.reconnect(token, sender).await?;
        self.member_squads.insert(member, squad);
        Ok(member)
    }

    pub async fn squad_info(&self, squad: SquadId) -> Result<SquadInfo, SquadError> {
        self.squads
            .get(&squad)
            .ok_or(SquadError::NotFound(squad))?
            .info()
            .await
    }

    pub async fn snapshot(&self, squad: SquadId) -> Result<SquadView, SquadError> {
        self.squads
            .get(&squad)
            .ok_or(SquadError::NotFound(squad))?
            .snapshot()
            .await
    }

    /// Squads that still accept joins and have a free slot, by ID.
    pub async fn list_open(&self) -> Vec<SquadInfo> {
        open_squads(self.handles()).await
    }

    /// Shuts down and forgets squads that launched, were abandoned, or whose
    /// actor already stopped. Returns the retired IDs.
    pub async fn retire_finished(&mut self) -> Vec<SquadId> {
        let mut retired = Vec::new();
        for (squad_id, handle) in &self.squads {
            match handle.info().await {
                Ok(info) if !info.phase.is_terminal() => {}
                _ => retired.push(*squad_id),
            }
        }

        for squad_id in &retired {
            if let Some(handle) = self.squads.remove(squad_id) {
                let _ = handle.shutdown().await;
            }
            self.member_squads.retain(|_, sid| *sid != *squad_id);
            tracing::info!(%squad_id, "squad retired");
        }
        retired
    }

    /// Shuts a squad down and unindexes its members.
    pub async fn destroy_squad(&mut self, squad: SquadId) -> Result<(), SquadError> {
        let handle = self.squads.remove(&squad).ok_or(SquadError::NotFound(squad))?;
        let _ = handle.shutdown().await;
        self.member_squads.retain(|_, sid| *sid != squad);
        tracing::info!(squad_id = %squad, "squad destroyed");
        Ok(())
    }

    /// Handle to the squad `member` is indexed in. Callers that share the
    /// manager behind a lock should take the handle and release the lock
    /// before awaiting the actor.
    pub fn member_handle(&self, member: MemberId) -> Result<SquadHandle, SquadError> {
        self.handle_of(member).cloned()
    }

    pub fn squad_handle(&self, squad: SquadId) -> Result<SquadHandle, SquadError> {
        self.squads.get(&squad).cloned().ok_or(SquadError::NotFound(squad))
    }

    pub fn handles(&self) -> Vec<SquadHandle> {
        self.squads.values().cloned().collect()
    }

    /// The squad a member is indexed in, if any.
    pub fn squad_of(&self, member: MemberId) -> Option<SquadId> {
        self.member_squads.get(&member).copied()
    }

    pub fn squad_count(&self) -> usize {
        self.squads.len()
    }

    pub fn squad_ids(&self) -> Vec<SquadId> {
        self.squads.keys().copied().collect()
    }

    fn handle_of(&self, member: MemberId) -> Result<&SquadHandle, SquadError> {
        let squad = self
            .member_squads
            .get(&member)
            .ok_or(SquadError::MemberNotFound(member))?;
        self.squads.get(squad).ok_or(SquadError::NotFound(*squad))
    }

    async fn still_member(&self, squad: SquadId, member: MemberId) -> bool {
        match self.squads.get(&squad) {
            Some(handle) => handle
                .snapshot()
                .await
                .is_ok_and(|view| view.member(member).is_some()),
            None => false,
        }
    }
}

/// Queries every squad in `handles` and keeps the ones that accept joins
/// and have a free slot, sorted by ID. Stopped squads are skipped.
pub async fn open_squads(handles: impl IntoIterator<Item = SquadHandle>) -> Vec<SquadInfo> {
    let mut infos = Vec::new();
    for handle in handles {
        if let Ok(info) = handle.info().await {
            if info.phase.is_joinable() && info.member_count < info.max_members {
                infos.push(info);
            }
        }
    }
    infos.sort_by_key(|info| info.squad_id.0);
    infos
}
