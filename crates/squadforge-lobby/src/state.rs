//! Canonical in-memory state of one squad.

use std::collections::HashMap;

use squadforge_protocol::{MemberId, MemberState, MemberView, Position, SquadView};

use crate::SquadError;

/// One participant of a squad.
#[derive(Debug, Clone, PartialEq)]
pub struct SquadMember {
    pub id: MemberId,
    pub name: String,
    pub pos: Position,
    pub state: MemberState,
    /// Order of arrival, assigned by [`SquadState::add_member`].
    joined_seq: u64,
}

impl SquadMember {
    /// A fresh, not-yet-ready member.
    pub fn new(id: MemberId, name: impl Into<String>, pos: Position) -> Self {
        Self {
            id,
            name: name.into(),
            pos,
            state: MemberState::NotReady,
            joined_seq: 0,
        }
    }

    pub fn joined_seq(&self) -> u64 {
        self.joined_seq
    }

    fn view(&self) -> MemberView {
        MemberView {
            id: self.id,
            name: self.name.clone(),
            pos: self.pos,
            state: self.state,
        }
    }
}

/// Members, owner, aggregate readiness and the start flag of one squad.
///
/// `ready_to_start` is derived and only changes through
/// [`recompute_readiness`](Self::recompute_readiness); every command that
/// touches membership or readiness must call it.
#[derive(Debug, Default)]
pub struct SquadState {
    members: HashMap<MemberId, SquadMember>,
    owner: Option<MemberId>,
    ready_to_start: bool,
    started: bool,
    handoff_pending: bool,
    next_seq: u64,
}

impl SquadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a member, stamping its arrival order.
    ///
    /// # Errors
    /// [`SquadError::AlreadyJoined`] if the id is already present.
    pub fn add_member(&mut self, mut member: SquadMember) -> Result<(), SquadError> {
        if self.members.contains_key(&member.id) {
            return Err(SquadError::AlreadyJoined(member.id));
        }
        member.joined_seq = self.next_seq;
        self.next_seq += 1;
        self.members.insert(member.id, member);
        Ok(())
    }

    /// Removes a member. If it held ownership, the earliest remaining joiner
    /// is promoted; an emptied squad has no owner.
    pub fn remove_member(&mut self, id: MemberId) -> Option<SquadMember> {
        let removed = self.members.remove(&id)?;
        if self.owner == Some(id) {
            self.owner = self
                .members
                .values()
                .min_by_key(|m| m.joined_seq)
                .map(|m| m.id);
        }
        Some(removed)
    }

    pub fn get_member(&self, id: MemberId) -> Result<&SquadMember, SquadError> {
        self.members.get(&id).ok_or(SquadError::MemberNotFound(id))
    }

    pub fn get_member_mut(&mut self, id: MemberId) -> Result<&mut SquadMember, SquadError> {
        self.members.get_mut(&id).ok_or(SquadError::MemberNotFound(id))
    }

    /// `ready_to_start` becomes true iff there is at least one member and
    /// every member is READY. An empty squad is never ready.
    pub fn recompute_readiness(&mut self) {
        self.ready_to_start = !self.members.is_empty()
            && self.members.values().all(|m| m.state == MemberState::Ready);
    }

    pub(crate) fn set_owner(&mut self, id: MemberId) {
        self.owner = Some(id);
    }

    pub fn owner(&self) -> Option<MemberId> {
        self.owner
    }

    pub fn ready_to_start(&self) -> bool {
        self.ready_to_start
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// True while a handoff is in flight or after the squad started.
    pub fn is_locked(&self) -> bool {
        self.started || self.handoff_pending
    }

    pub fn contains(&self, id: MemberId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &SquadMember> {
        self.members.values()
    }

    /// Freezes roster and readiness for a handoff. Returns `false` if the
    /// squad is already locked.
    pub(crate) fn begin_handoff(&mut self) -> bool {
        if self.is_locked() {
            return false;
        }
        self.handoff_pending = true;
        true
    }

    /// Every seat was granted: `started` flips, permanently.
    pub(crate) fn commit_start(&mut self) {
        self.handoff_pending = false;
        self.started = true;
    }

    /// The handoff failed; the squad opens again with `started` untouched.
    pub(crate) fn abort_start(&mut self) {
        self.handoff_pending = false;
    }

    /// Snapshot for clients, members sorted by id.
    pub fn view(&self) -> SquadView {
        let mut members: Vec<MemberView> = self.members.values().map(SquadMember::view).collect();
        members.sort_by_key(|m| m.id);
        SquadView {
            members,
            owner: self.owner,
            ready_to_start: self.ready_to_start,
            started: self.started,
        }
    }
}
